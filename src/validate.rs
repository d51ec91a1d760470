//! Read-only integrity report. Never writes; safe to run before or after
//! any other step.

use anyhow::Result;
use std::collections::HashSet;
use tracing::{info, instrument, warn};

use crate::context::MigrationContext;
use crate::migrate::StepCounters;
use crate::store::TargetStore;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct OrphanReport {
    /// Progress rows whose career challenge no longer exists.
    pub progress_missing_parent: Vec<(i64, i64)>,
    /// Progress rows whose goal no longer exists.
    pub progress_missing_goal: Vec<(i64, i64)>,
    /// Goals whose competition id resolves to no competition group.
    pub goals_missing_competition: Vec<i64>,
    /// Junction rows with a dangling side (group_id, api_competition_id).
    pub broken_links: Vec<(i64, i64)>,
    /// Provider competitions no group links to.
    pub unlinked_api_competitions: Vec<i64>,
}

impl OrphanReport {
    pub fn is_clean(&self) -> bool {
        self.progress_missing_parent.is_empty()
            && self.progress_missing_goal.is_empty()
            && self.goals_missing_competition.is_empty()
            && self.broken_links.is_empty()
    }
}

pub async fn orphan_report(ctx: &MigrationContext) -> Result<OrphanReport> {
    let career: HashSet<i64> = ctx
        .target
        .career_challenge_rows()
        .await?
        .into_iter()
        .map(|c| c.id)
        .collect();
    let goals = ctx.target.challenge_goal_rows().await?;
    let goal_ids: HashSet<i64> = goals.iter().map(|g| g.id).collect();
    let group_ids = ctx.target.competition_group_ids().await?;
    let api_ids = ctx.target.api_competition_ids().await?;
    let links = ctx.target.competition_links().await?;

    let mut report = OrphanReport::default();

    for p in ctx.target.progress_rows().await? {
        if !career.contains(&p.career_challenge_id) {
            report
                .progress_missing_parent
                .push((p.career_challenge_id, p.challenge_goal_id));
        }
        if !goal_ids.contains(&p.challenge_goal_id) {
            report
                .progress_missing_goal
                .push((p.career_challenge_id, p.challenge_goal_id));
        }
    }
    for g in &goals {
        if let Some(comp) = g.competition_id {
            if !group_ids.contains(&comp) {
                report.goals_missing_competition.push(g.id);
            }
        }
    }
    let mut linked_api: HashSet<i64> = HashSet::new();
    for (group_id, api_id) in &links {
        linked_api.insert(*api_id);
        if !group_ids.contains(group_id) || !api_ids.contains(api_id) {
            report.broken_links.push((*group_id, *api_id));
        }
    }
    let mut unlinked: Vec<i64> = api_ids.difference(&linked_api).copied().collect();
    unlinked.sort();
    report.unlinked_api_competitions = unlinked;

    Ok(report)
}

#[instrument(skip(ctx))]
pub async fn run(ctx: &MigrationContext) -> Result<StepCounters> {
    let mut counters = StepCounters::default();

    for (table, count) in ctx.target.table_counts().await? {
        info!(table, count, "row count");
    }

    let report = orphan_report(ctx).await?;
    for (cc, goal) in &report.progress_missing_parent {
        warn!(career_challenge_id = cc, challenge_goal_id = goal, "progress row without parent");
    }
    for (cc, goal) in &report.progress_missing_goal {
        warn!(career_challenge_id = cc, challenge_goal_id = goal, "progress row without goal");
    }
    for goal_id in &report.goals_missing_competition {
        warn!(goal_id, "goal references unknown competition group");
    }
    for (group_id, api_id) in &report.broken_links {
        warn!(group_id, api_id, "competition link has a dangling side");
    }
    if !report.unlinked_api_competitions.is_empty() {
        info!(
            count = report.unlinked_api_competitions.len(),
            "provider competitions not linked to any group"
        );
    }

    counters.errors = (report.progress_missing_parent.len()
        + report.progress_missing_goal.len()
        + report.goals_missing_competition.len()
        + report.broken_links.len()) as u64;
    if counters.errors == 0 {
        info!("integrity report clean");
    }
    counters.report("report");
    Ok(counters)
}
