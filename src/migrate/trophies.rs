use anyhow::Result;
use tracing::instrument;

use super::{parse_numeric_id, StepCounters};
use crate::context::MigrationContext;
use crate::errors::RecordError;
use crate::resolver::RefMaps;
use crate::source::records::TrophyDoc;
use crate::source::{subcollections, SourceStore};
use crate::store::{TargetStore, TrophyRow};

#[instrument(skip(ctx))]
pub async fn run(ctx: &MigrationContext) -> Result<StepCounters> {
    let maps = RefMaps::load(ctx.target.as_ref()).await?;
    let mut counters = StepCounters::default();

    for uid in ctx.source.user_ids().await? {
        for save in ctx.source.saves(&uid).await? {
            if ctx.target.save_ref(&save.id).await?.is_none() {
                counters.skip(&RecordError::unresolved(&save.path, "save", &save.id));
                continue;
            }
            let docs = ctx
                .source
                .save_subcollection(&uid, &save.id, subcollections::TROPHIES)
                .await?;
            for doc in docs {
                let rec = match TrophyDoc::parse(&doc) {
                    Ok(rec) => rec,
                    Err(err) => {
                        counters.skip(&err);
                        continue;
                    }
                };
                // Both FKs are required for a trophy row.
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
                let group_id = match parse_numeric_id(&doc.path, "competitionId", &rec.competition_id)
                {
                    Ok(api_id) => match maps.group_for_api_competition(api_id) {
                        Some(id) => id,
                        None => {
                            counters.skip(&RecordError::unresolved(
                                &doc.path,
                                "competition",
                                api_id,
                            ));
                            continue;
                        }
                    },
                    Err(err) => {
                        counters.skip(&err);
                        continue;
                    }
                };
                let (_, created) = ctx
                    .target
                    .find_or_create_trophy(&TrophyRow {
                        save_id: save.id.clone(),
                        team_id,
                        competition_group_id: group_id,
                        season: rec.season,
                    })
                    .await?;
                counters.tally_created(created);
            }
        }
    }
    counters.report("trophies");
    Ok(counters)
}
