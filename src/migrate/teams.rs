use anyhow::Result;
use tracing::instrument;

use super::StepCounters;
use crate::context::MigrationContext;
use crate::errors::RecordError;
use crate::resolver::RefMaps;
use crate::source::{collections, records::TeamDoc, SourceStore};
use crate::store::{TargetStore, TeamRow};

#[instrument(skip(ctx))]
pub async fn run(ctx: &MigrationContext) -> Result<StepCounters> {
    let maps = RefMaps::load(ctx.target.as_ref()).await?;
    let mut counters = StepCounters::default();
    for doc in ctx.source.collection(collections::TEAMS).await? {
        let mut rec = match TeamDoc::parse(&doc) {
            Ok(rec) => rec,
            Err(err) => {
                counters.skip(&err);
                continue;
            }
        };
        // Country is an optional FK: null it out when unknown rather than
        // dropping the team.
        if let Some(code) = &rec.country_code {
            if !maps.country_exists(code) {
                counters.field_warning(&RecordError::unresolved(&doc.path, "country", code));
                rec.country_code = None;
            }
        }
        let outcome = ctx
            .target
            .upsert_team(&TeamRow {
                id: rec.id,
                name: rec.name,
                logo: rec.logo,
                national: rec.national,
                country_code: rec.country_code,
                coordinates: rec.coordinates,
                is_female: rec.is_female,
            })
            .await?;
        counters.tally(outcome);
    }
    counters.report("teams");
    Ok(counters)
}
