use anyhow::Result;
use tracing::instrument;

use super::{parse_numeric_id, StepCounters};
use crate::context::MigrationContext;
use crate::errors::RecordError;
use crate::resolver::RefMaps;
use crate::source::records::CareerStintDoc;
use crate::source::{subcollections, SourceStore};
use crate::store::{CareerStintRow, TargetStore};

#[instrument(skip(ctx))]
pub async fn run(ctx: &MigrationContext) -> Result<StepCounters> {
    let maps = RefMaps::load(ctx.target.as_ref()).await?;
    let mut counters = StepCounters::default();

    for uid in ctx.source.user_ids().await? {
        for save in ctx.source.saves(&uid).await? {
            // Stints for saves that were themselves skipped have no parent
            // row; skip them the same way.
            if ctx.target.save_ref(&save.id).await?.is_none() {
                counters.skip(&RecordError::unresolved(&save.path, "save", &save.id));
                continue;
            }
            let docs = ctx
                .source
                .save_subcollection(&uid, &save.id, subcollections::CAREER)
                .await?;
            for doc in docs {
                let rec = match CareerStintDoc::parse(&doc) {
                    Ok(rec) => rec,
                    Err(err) => {
                        counters.skip(&err);
                        continue;
                    }
                };
                // Team is required for a stint.
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
                let outcome = ctx
                    .target
                    .upsert_career_stint(&CareerStintRow {
                        save_id: save.id.clone(),
                        team_id,
                        start_date: rec.start_date,
                        end_date: rec.end_date,
                        is_national: rec.is_national,
                    })
                    .await?;
                counters.tally(outcome);
            }
        }
    }
    counters.report("career-stints");
    Ok(counters)
}
