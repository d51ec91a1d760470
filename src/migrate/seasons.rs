use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::instrument;

use super::{parse_numeric_id, StepCounters};
use crate::context::MigrationContext;
use crate::errors::RecordError;
use crate::resolver::RefMaps;
use crate::source::records::SeasonDoc;
use crate::source::{subcollections, SourceStore};
use crate::store::{CupResultRow, LeagueResultRow, SeasonRow, TargetStore};

const FETCH_CONCURRENCY: usize = 8;

#[instrument(skip(ctx))]
pub async fn run(ctx: &MigrationContext) -> Result<StepCounters> {
    let maps = RefMaps::load(ctx.target.as_ref()).await?;
    let mut counters = StepCounters::default();

    for uid in ctx.source.user_ids().await? {
        let saves = ctx.source.saves(&uid).await?;
        // Season fetches fan out; writes below stay strictly sequential.
        let mut fetches = stream::iter(saves)
            .map(|save| {
                let source = ctx.source.clone();
                let uid = uid.clone();
                async move {
                    let docs = source
                        .save_subcollection(&uid, &save.id, subcollections::SEASONS)
                        .await;
                    (save.id, docs)
                }
            })
            .buffered(FETCH_CONCURRENCY);

        while let Some((save_id, docs)) = fetches.next().await {
            if ctx.target.save_ref(&save_id).await?.is_none() {
                let path = format!("users/{uid}/saves/{save_id}");
                counters.skip(&RecordError::unresolved(&path, "save", &save_id));
                continue;
            }
            for doc in docs? {
                let rec = match SeasonDoc::parse(&doc) {
                    Ok(rec) => rec,
                    Err(err) => {
                        counters.skip(&err);
                        continue;
                    }
                };
                let team_id = match parse_numeric_id(&doc.path, "teamId", &rec.team_id) {
                    Ok(id) if maps.team_exists(id) => id,
                    Ok(id) => {
                        counters.skip(&RecordError::unresolved(&doc.path, "team", id));
                        continue;
                    }
                    Err(err) => {
                        counters.skip(&err);
                        continue;
                    }
                };
                let (season_id, created) = ctx
                    .target
                    .find_or_create_season(&SeasonRow {
                        save_id: save_id.clone(),
                        team_id,
                        season: rec.season.clone(),
                    })
                    .await?;
                counters.tally_created(created);

                for result in &rec.league_results {
                    let competition_id = match resolve_competition(
                        &maps,
                        &mut counters,
                        &doc.path,
                        &result.competition_id,
                    ) {
                        Some(id) => id,
                        None => continue,
                    };
                    let outcome = ctx
                        .target
                        .upsert_league_result(&LeagueResultRow {
                            season_id,
                            competition_id,
                            position: result.position,
                            promoted: result.promoted,
                            relegated: result.relegated,
                        })
                        .await?;
                    counters.tally(outcome);
                }
                for result in &rec.cup_results {
                    let competition_id = match resolve_competition(
                        &maps,
                        &mut counters,
                        &doc.path,
                        &result.competition_id,
                    ) {
                        Some(id) => id,
                        None => continue,
                    };
                    let outcome = ctx
                        .target
                        .upsert_cup_result(&CupResultRow {
                            season_id,
                            competition_id,
                            reached_round: result.reached_round.clone(),
                        })
                        .await?;
                    counters.tally(outcome);
                }
            }
        }
    }
    counters.report("seasons");
    Ok(counters)
}

/// Result rows require a competition; an unresolvable one skips the result,
/// not the season.
fn resolve_competition(
    maps: &RefMaps,
    counters: &mut StepCounters,
    path: &str,
    raw: &str,
) -> Option<i64> {
    match parse_numeric_id(path, "competitionId", raw) {
        Ok(api_id) => match maps.group_for_api_competition(api_id) {
            Some(group_id) => Some(group_id),
            None => {
                counters.skip(&RecordError::unresolved(path, "competition", api_id));
                None
            }
        },
        Err(err) => {
            counters.skip(&err);
            None
        }
    }
}
