use anyhow::Result;
use tracing::instrument;

use super::StepCounters;
use crate::context::MigrationContext;
use crate::source::{collections, records::CountryDoc, SourceStore};
use crate::store::{CountryRow, TargetStore};

#[instrument(skip(ctx))]
pub async fn run(ctx: &MigrationContext) -> Result<StepCounters> {
    let mut counters = StepCounters::default();
    for doc in ctx.source.collection(collections::COUNTRIES).await? {
        let rec = match CountryDoc::parse(&doc) {
            Ok(rec) => rec,
            Err(err) => {
                counters.skip(&err);
                continue;
            }
        };
        let outcome = ctx
            .target
            .upsert_country(&CountryRow {
                code: rec.code,
                name: rec.name,
                flag: rec.flag,
                in_football_manager: rec.in_football_manager,
            })
            .await?;
        counters.tally(outcome);
    }
    counters.report("countries");
    Ok(counters)
}
