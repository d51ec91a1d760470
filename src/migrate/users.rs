use anyhow::Result;
use tracing::instrument;

use super::StepCounters;
use crate::context::MigrationContext;
use crate::source::SourceStore;
use crate::store::TargetStore;

#[instrument(skip(ctx))]
pub async fn run(ctx: &MigrationContext) -> Result<StepCounters> {
    let mut counters = StepCounters::default();
    for uid in ctx.source.user_ids().await? {
        let outcome = ctx.target.upsert_user(&uid).await?;
        counters.tally(outcome);
    }
    counters.report("users");
    Ok(counters)
}
