use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::instrument;

use super::{parse_numeric_id, StepCounters};
use crate::context::MigrationContext;
use crate::errors::RecordError;
use crate::resolver::RefMaps;
use crate::source::records::SaveDoc;
use crate::source::SourceStore;
use crate::store::{SaveRow, TargetStore};

const FETCH_CONCURRENCY: usize = 8;

#[instrument(skip(ctx))]
pub async fn run(ctx: &MigrationContext) -> Result<StepCounters> {
    let maps = RefMaps::load(ctx.target.as_ref()).await?;
    let mut counters = StepCounters::default();

    // Read-side fan-out only; every target write below is awaited before the
    // next record so natural-key upserts stay consistent.
    let user_ids = ctx.source.user_ids().await?;
    let mut fetches = stream::iter(user_ids)
        .map(|uid| {
            let source = ctx.source.clone();
            async move {
                let saves = source.saves(&uid).await;
                (uid, saves)
            }
        })
        .buffered(FETCH_CONCURRENCY);

    while let Some((uid, saves)) = fetches.next().await {
        for doc in saves? {
            let rec = match SaveDoc::parse(&doc) {
                Ok(rec) => rec,
                Err(err) => {
                    counters.skip(&err);
                    continue;
                }
            };
            // game is required; a save we cannot attribute to a game is
            // unusable downstream.
            let game_id = match maps.game_id(&rec.game) {
                Some(id) => id,
                None => {
                    counters.skip(&RecordError::unresolved(&doc.path, "game", &rec.game));
                    continue;
                }
            };
            let current_club_id =
                optional_team(&maps, &mut counters, &doc.path, "currentClub", rec.current_club);
            let current_nt_id =
                optional_team(&maps, &mut counters, &doc.path, "currentNT", rec.current_nt);
            let current_league_id = optional_league(
                &maps,
                &mut counters,
                &doc.path,
                rec.current_league,
            );

            let outcome = ctx
                .target
                .upsert_save(&SaveRow {
                    id: rec.id,
                    user_id: uid.clone(),
                    game_id,
                    name: rec.name,
                    current_club_id,
                    current_nt_id,
                    current_league_id,
                    current_date: rec.current_date,
                })
                .await?;
            counters.tally(outcome);
        }
    }
    counters.report("saves");
    Ok(counters)
}

/// Optional team FK: parse the string id and confirm the team exists; on
/// either failure the field is nulled with a warning, not the whole record.
fn optional_team(
    maps: &RefMaps,
    counters: &mut StepCounters,
    path: &str,
    field: &'static str,
    raw: Option<String>,
) -> Option<i64> {
    let raw = raw?;
    match parse_numeric_id(path, field, &raw) {
        Ok(id) if maps.team_exists(id) => Some(id),
        Ok(id) => {
            counters.field_warning(&RecordError::unresolved(path, "team", id));
            None
        }
        Err(err) => {
            counters.field_warning(&err);
            None
        }
    }
}

fn optional_league(
    maps: &RefMaps,
    counters: &mut StepCounters,
    path: &str,
    raw: Option<String>,
) -> Option<i64> {
    let raw = raw?;
    match parse_numeric_id(path, "currentLeague", &raw) {
        Ok(api_id) => match maps.group_for_api_competition(api_id) {
            Some(group_id) => Some(group_id),
            None => {
                counters.field_warning(&RecordError::unresolved(path, "competition", api_id));
                None
            }
        },
        Err(err) => {
            counters.field_warning(&err);
            None
        }
    }
}
