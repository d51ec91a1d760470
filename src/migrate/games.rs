use anyhow::Result;
use tracing::instrument;

use super::StepCounters;
use crate::context::MigrationContext;
use crate::source::{collections, records::GameDoc, SourceStore};
use crate::store::{GameRow, TargetStore};

#[instrument(skip(ctx))]
pub async fn run(ctx: &MigrationContext) -> Result<StepCounters> {
    let mut counters = StepCounters::default();
    for doc in ctx.source.collection(collections::GAMES).await? {
        let rec = match GameDoc::parse(&doc) {
            Ok(rec) => rec,
            Err(err) => {
                counters.skip(&err);
                continue;
            }
        };
        let (_, outcome) = ctx
            .target
            .upsert_game(&GameRow {
                name: rec.name,
                short_name: rec.short_name,
                version: rec.version,
                platform: rec.platform,
                variant: rec.variant,
                is_active: rec.is_active,
                sort_order: rec.sort_order,
            })
            .await?;
        counters.tally(outcome);
    }
    counters.report("games");
    Ok(counters)
}
