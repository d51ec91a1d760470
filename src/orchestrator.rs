//! Step catalog and the driver loop.
//!
//! Steps run in catalog order regardless of the order they were named on
//! the command line. Selecting an unknown step name fails before anything
//! runs.

use anyhow::{bail, Context, Result};
use std::time::Instant;
use tracing::{error, info};

use crate::context::MigrationContext;
use crate::migrate::StepCounters;
use crate::{dedup, migrate, validate};

type StepFuture<'a> = futures::future::BoxFuture<'a, Result<StepCounters>>;

pub struct Step {
    pub name: &'static str,
    pub description: &'static str,
    pub run: for<'a> fn(&'a MigrationContext) -> StepFuture<'a>,
}

fn countries(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(migrate::countries::run(ctx))
}
fn games(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(migrate::games::run(ctx))
}
fn teams(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(migrate::teams::run(ctx))
}
fn users(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(migrate::users::run(ctx))
}
fn saves(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(migrate::saves::run(ctx))
}
fn career_stints(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(migrate::career::run(ctx))
}
fn seasons(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(migrate::seasons::run(ctx))
}
fn api_competitions(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(migrate::competitions::run_api(ctx))
}
fn competition_groups(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(migrate::competitions::run_groups(ctx))
}
fn competition_links(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(migrate::competitions::run_links(ctx))
}
fn competition_gap_fill(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(migrate::gapfill::run(ctx))
}
fn challenge_catalog(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(migrate::challenges::run_catalog(ctx))
}
fn challenge_progress(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(migrate::challenges::run_progress(ctx))
}
fn trophies(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(migrate::trophies::run(ctx))
}
fn dedup_challenges(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(dedup::run_challenges(ctx))
}
fn dedup_career_challenges(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(dedup::run_career_challenges(ctx))
}
fn report(ctx: &MigrationContext) -> StepFuture<'_> {
    Box::pin(validate::run(ctx))
}

/// Every step, in dependency order. All reference data first — including
/// the competition pipeline, whose junction rows the save and season
/// migrators resolve against — then per-user data, challenges, repairs,
/// and the report.
pub fn catalog() -> Vec<Step> {
    vec![
        Step { name: "countries", description: "country reference catalog", run: countries },
        Step { name: "games", description: "game title catalog", run: games },
        Step { name: "teams", description: "team catalog", run: teams },
        Step { name: "api-competitions", description: "provider competition catalog", run: api_competitions },
        Step { name: "competition-groups", description: "cluster provider competitions into groups", run: competition_groups },
        Step { name: "competition-links", description: "group-to-provider junction rows", run: competition_links },
        Step { name: "competition-gap-fill", description: "backfill competitions referenced only by challenge goals", run: competition_gap_fill },
        Step { name: "users", description: "user accounts", run: users },
        Step { name: "saves", description: "career saves per user", run: saves },
        Step { name: "career-stints", description: "managerial stints per save", run: career_stints },
        Step { name: "seasons", description: "seasons with league and cup results", run: seasons },
        Step { name: "challenge-catalog", description: "challenge templates and goals", run: challenge_catalog },
        Step { name: "challenge-progress", description: "per-user challenge progress", run: challenge_progress },
        Step { name: "trophies", description: "trophies won per save", run: trophies },
        Step { name: "dedup-challenges", description: "merge duplicate challenge templates", run: dedup_challenges },
        Step { name: "dedup-career-challenges", description: "merge duplicate career challenges", run: dedup_career_challenges },
        Step { name: "report", description: "read-only integrity report", run: report },
    ]
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: Vec<(&'static str, StepCounters)>,
    pub failed: Vec<&'static str>,
    pub totals: StepCounters,
}

impl RunSummary {
    pub fn ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run the selected steps (all of them when `selected` is empty) in catalog
/// order. Unknown names abort before any step runs.
pub async fn run_steps(
    ctx: &MigrationContext,
    steps: &[Step],
    selected: &[String],
    continue_on_error: bool,
) -> Result<RunSummary> {
    let unknown: Vec<&String> = selected
        .iter()
        .filter(|name| !steps.iter().any(|s| s.name == name.as_str()))
        .collect();
    if !unknown.is_empty() {
        let valid = steps.iter().map(|s| s.name).collect::<Vec<_>>().join(", ");
        bail!("unknown step(s) {unknown:?}; valid steps are: {valid}");
    }

    let mut summary = RunSummary::default();
    for step in steps {
        if !selected.is_empty() && !selected.iter().any(|s| s == step.name) {
            continue;
        }
        info!(step = step.name, "starting {}", step.description);
        let started = Instant::now();
        match (step.run)(ctx).await {
            Ok(counters) => {
                info!(step = step.name, elapsed = ?started.elapsed(), "step finished");
                summary.totals.merge(counters);
                summary.completed.push((step.name, counters));
            }
            Err(err) if continue_on_error => {
                error!(step = step.name, %err, "step failed, continuing");
                summary.failed.push(step.name);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("step {} failed", step.name));
            }
        }
    }

    info!(
        completed = summary.completed.len(),
        failed = summary.failed.len(),
        created = summary.totals.created,
        updated = summary.totals.updated,
        skipped = summary.totals.skipped,
        errors = summary.totals.errors,
        "session summary"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::MemorySource;
    use crate::store::memory::MemoryStore;
    use std::sync::Arc;

    fn empty_ctx() -> MigrationContext {
        MigrationContext::new(Arc::new(MemorySource::default()), Arc::new(MemoryStore::default()))
    }

    fn ok_step(ctx: &MigrationContext) -> StepFuture<'_> {
        let _ = ctx;
        Box::pin(async { Ok(StepCounters { created: 1, ..Default::default() }) })
    }

    fn failing_step(ctx: &MigrationContext) -> StepFuture<'_> {
        let _ = ctx;
        Box::pin(async { Err(anyhow::anyhow!("boom")) })
    }

    fn test_catalog() -> Vec<Step> {
        vec![
            Step { name: "first", description: "", run: ok_step },
            Step { name: "second", description: "", run: failing_step },
            Step { name: "third", description: "", run: ok_step },
        ]
    }

    #[tokio::test]
    async fn unknown_step_name_aborts_before_running_anything() {
        let ctx = empty_ctx();
        let err = run_steps(&ctx, &test_catalog(), &["nope".to_string()], false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown step"));
        assert!(err.to_string().contains("first"));
    }

    #[tokio::test]
    async fn failure_stops_the_run_by_default() {
        let ctx = empty_ctx();
        let err = run_steps(&ctx, &test_catalog(), &[], false).await.unwrap_err();
        assert!(err.to_string().contains("step second failed"));
    }

    #[tokio::test]
    async fn continue_on_error_runs_remaining_steps() {
        let ctx = empty_ctx();
        let summary = run_steps(&ctx, &test_catalog(), &[], true).await.unwrap();
        assert_eq!(summary.failed, vec!["second"]);
        assert_eq!(
            summary.completed.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec!["first", "third"]
        );
        assert!(!summary.ok());
        assert_eq!(summary.totals.created, 2);
    }

    #[tokio::test]
    async fn selection_runs_in_catalog_order() {
        let ctx = empty_ctx();
        let catalog = vec![
            Step { name: "first", description: "", run: ok_step },
            Step { name: "third", description: "", run: ok_step },
        ];
        let summary = run_steps(
            &ctx,
            &catalog,
            &["third".to_string(), "first".to_string()],
            false,
        )
        .await
        .unwrap();
        assert_eq!(
            summary.completed.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec!["first", "third"]
        );
    }

    #[test]
    fn report_is_the_last_catalog_step() {
        let steps = catalog();
        assert_eq!(steps.last().unwrap().name, "report");
        assert_eq!(steps.len(), 17);
    }

    #[test]
    fn competition_pipeline_precedes_per_user_data() {
        // Saves and seasons resolve currentLeague and result competitions
        // through the junction table; it must be populated first.
        let steps = catalog();
        let pos = |name: &str| steps.iter().position(|s| s.name == name).unwrap();
        assert!(pos("competition-links") < pos("saves"));
        assert!(pos("competition-gap-fill") < pos("saves"));
        assert!(pos("teams") < pos("saves"));
        assert!(pos("saves") < pos("career-stints"));
        assert!(pos("challenge-catalog") < pos("challenge-progress"));
    }
}
