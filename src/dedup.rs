//! Post-hoc repair of rows duplicated by historical non-idempotent runs.
//!
//! Planning is pure: given the current table contents, produce one
//! `RepairGroup` per duplicate group. Applying a group is atomic in the
//! store; a failing group never blocks or corrupts the others.

use anyhow::Result;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::collections::HashMap;
use tracing::{error, info, instrument};

use crate::context::MigrationContext;
use crate::migrate::StepCounters;
use crate::store::{
    CareerChallengeRec, ChallengeRec, GoalRec, ProgressRow, RepairAction, RepairGroup, TargetStore,
};

/// Goal identity inside one challenge: description + competition + country.
type GoalIdentity = (String, Option<i64>, Option<String>);

fn goal_identity(g: &GoalRec) -> GoalIdentity {
    (g.description.clone(), g.competition_id, g.country_code.clone())
}

/// OR-merge of two progress rows for the same logical goal: complete if
/// either was, completed at the earlier of the non-null timestamps.
fn merge_completion(
    a: (bool, Option<DateTime<Utc>>),
    b: (bool, Option<DateTime<Utc>>),
) -> (bool, Option<DateTime<Utc>>) {
    let is_complete = a.0 || b.0;
    let completed_at = match (a.1, b.1) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (None, None) => None,
    };
    (is_complete, completed_at)
}

/// Deterministic keeper: lowest surrogate id, ties broken by the earliest
/// timestamp.
fn pick_keeper<T, K: Ord>(rows: &mut Vec<T>, key: impl Fn(&T) -> K) {
    rows.sort_by_key(key);
}

pub fn plan_challenge_repair(
    challenges: &[ChallengeRec],
    goals: &[GoalRec],
    progress: &[ProgressRow],
    career: &[CareerChallengeRec],
) -> Vec<RepairGroup> {
    let mut goals_by_challenge: HashMap<i64, Vec<&GoalRec>> = HashMap::new();
    for g in goals {
        goals_by_challenge.entry(g.challenge_id).or_default().push(g);
    }
    let mut progress_by_goal: HashMap<i64, Vec<&ProgressRow>> = HashMap::new();
    let mut prog_state: HashMap<(i64, i64), ProgressRow> = HashMap::new();
    for p in progress {
        progress_by_goal.entry(p.challenge_goal_id).or_default().push(p);
        prog_state.insert((p.career_challenge_id, p.challenge_goal_id), p.clone());
    }
    let mut career_by_challenge: HashMap<i64, Vec<&CareerChallengeRec>> = HashMap::new();
    for c in career {
        career_by_challenge.entry(c.challenge_id).or_default().push(c);
    }

    let mut plans = Vec::new();
    let grouped = challenges
        .iter()
        .map(|c| (c.name.clone(), c))
        .into_group_map();
    let mut names: Vec<&String> = grouped.keys().collect();
    names.sort();

    for name in names {
        let mut rows: Vec<&ChallengeRec> = grouped[name].clone();
        if rows.len() < 2 {
            continue;
        }
        pick_keeper(&mut rows, |r| (r.id, r.created_at));
        let keeper = rows[0];
        let losers = &rows[1..];

        let mut group = RepairGroup {
            key: format!("challenge name={name:?}"),
            keeper_id: keeper.id,
            loser_ids: losers.iter().map(|l| l.id).collect(),
            actions: Vec::new(),
        };

        let mut identities: HashMap<GoalIdentity, i64> = HashMap::new();
        let mut keeper_goals: Vec<&GoalRec> = goals_by_challenge
            .get(&keeper.id)
            .cloned()
            .unwrap_or_default();
        keeper_goals.sort_by_key(|g| g.id);
        for g in keeper_goals {
            identities.entry(goal_identity(g)).or_insert(g.id);
        }

        // Career challenges already tracking the keeper, by (user, save):
        // a loser's career challenge for the same save cannot be re-pointed
        // without tripping the (user, challenge, save) uniqueness.
        let mut keeper_ccs: HashMap<(String, String), i64> = HashMap::new();
        if let Some(ccs) = career_by_challenge.get(&keeper.id) {
            for cc in ccs {
                let entry = keeper_ccs
                    .entry((cc.user_id.clone(), cc.save_id.clone()))
                    .or_insert(cc.id);
                *entry = (*entry).min(cc.id);
            }
        }

        for loser in losers {
            let mut loser_goals: Vec<&GoalRec> = goals_by_challenge
                .get(&loser.id)
                .cloned()
                .unwrap_or_default();
            loser_goals.sort_by_key(|g| g.id);
            for g in loser_goals {
                match identities.get(&goal_identity(g)) {
                    Some(&kept_goal) => {
                        // The keeper already owns this goal: progress rows are
                        // re-pointed (merging where the keeper's goal already
                        // has one), then the duplicate goal is discarded.
                        let refs: Vec<ProgressRow> = progress_by_goal
                            .get(&g.id)
                            .map(|ps| ps.iter().map(|p| (*p).clone()).collect())
                            .unwrap_or_default();
                        for p in refs {
                            let target_key = (p.career_challenge_id, kept_goal);
                            let merged = match prog_state.get(&target_key) {
                                Some(existing) => merge_completion(
                                    (existing.is_complete, existing.completed_at),
                                    (p.is_complete, p.completed_at),
                                ),
                                None => (p.is_complete, p.completed_at),
                            };
                            let row = ProgressRow {
                                career_challenge_id: p.career_challenge_id,
                                challenge_goal_id: kept_goal,
                                is_complete: merged.0,
                                completed_at: merged.1,
                            };
                            prog_state.insert(target_key, row.clone());
                            prog_state.remove(&(p.career_challenge_id, g.id));
                            group.actions.push(RepairAction::WriteProgress(row));
                            group.actions.push(RepairAction::DeleteProgress {
                                career_challenge_id: p.career_challenge_id,
                                challenge_goal_id: g.id,
                            });
                        }
                        group.actions.push(RepairAction::DeleteGoal { goal_id: g.id });
                    }
                    None => {
                        group.actions.push(RepairAction::RepointGoal {
                            goal_id: g.id,
                            challenge_id: keeper.id,
                        });
                        identities.insert(goal_identity(g), g.id);
                    }
                }
            }
            // Career challenges tracking the loser template follow it to the
            // keeper. When the keeper already has one for the same
            // (user, save), re-pointing would collide, so the loser's
            // progress is OR-merged into the keeper's row and the loser's
            // career challenge is deleted instead.
            let mut loser_ccs: Vec<&CareerChallengeRec> = career_by_challenge
                .get(&loser.id)
                .cloned()
                .unwrap_or_default();
            loser_ccs.sort_by_key(|cc| cc.id);
            for cc in loser_ccs {
                let cc_key = (cc.user_id.clone(), cc.save_id.clone());
                match keeper_ccs.get(&cc_key).copied() {
                    Some(target_cc) => {
                        let mut rows: Vec<ProgressRow> = prog_state
                            .values()
                            .filter(|p| p.career_challenge_id == cc.id)
                            .cloned()
                            .collect();
                        rows.sort_by_key(|p| p.challenge_goal_id);
                        for p in rows {
                            let target_key = (target_cc, p.challenge_goal_id);
                            let (is_complete, completed_at) =
                                match prog_state.get(&target_key) {
                                    Some(existing) => merge_completion(
                                        (existing.is_complete, existing.completed_at),
                                        (p.is_complete, p.completed_at),
                                    ),
                                    None => (p.is_complete, p.completed_at),
                                };
                            let row = ProgressRow {
                                career_challenge_id: target_cc,
                                challenge_goal_id: p.challenge_goal_id,
                                is_complete,
                                completed_at,
                            };
                            prog_state.insert(target_key, row.clone());
                            prog_state.remove(&(cc.id, p.challenge_goal_id));
                            group.actions.push(RepairAction::WriteProgress(row));
                            group.actions.push(RepairAction::DeleteProgress {
                                career_challenge_id: cc.id,
                                challenge_goal_id: p.challenge_goal_id,
                            });
                        }
                        group.actions.push(RepairAction::DeleteCareerChallenge {
                            career_challenge_id: cc.id,
                        });
                    }
                    None => {
                        group.actions.push(RepairAction::RepointCareerChallenge {
                            career_challenge_id: cc.id,
                            challenge_id: keeper.id,
                        });
                        keeper_ccs.insert(cc_key, cc.id);
                    }
                }
            }
            group.actions.push(RepairAction::DeleteChallenge {
                challenge_id: loser.id,
            });
        }
        plans.push(group);
    }
    plans
}

pub fn plan_career_challenge_repair(
    career: &[CareerChallengeRec],
    progress: &[ProgressRow],
) -> Vec<RepairGroup> {
    let mut prog_state: HashMap<(i64, i64), ProgressRow> = HashMap::new();
    let mut by_parent: HashMap<i64, Vec<ProgressRow>> = HashMap::new();
    for p in progress {
        prog_state.insert((p.career_challenge_id, p.challenge_goal_id), p.clone());
        by_parent
            .entry(p.career_challenge_id)
            .or_default()
            .push(p.clone());
    }

    let grouped = career
        .iter()
        .map(|c| ((c.user_id.clone(), c.challenge_id, c.save_id.clone()), c))
        .into_group_map();
    let mut keys: Vec<&(String, i64, String)> = grouped.keys().collect();
    keys.sort();

    let mut plans = Vec::new();
    for key in keys {
        let mut rows: Vec<&CareerChallengeRec> = grouped[key].clone();
        if rows.len() < 2 {
            continue;
        }
        pick_keeper(&mut rows, |r| (r.id, r.started_at));
        let keeper = rows[0];
        let losers = &rows[1..];

        let mut group = RepairGroup {
            key: format!(
                "career_challenge user={} challenge={} save={}",
                key.0, key.1, key.2
            ),
            keeper_id: keeper.id,
            loser_ids: losers.iter().map(|l| l.id).collect(),
            actions: Vec::new(),
        };

        for loser in losers {
            let mut rows: Vec<ProgressRow> =
                by_parent.get(&loser.id).cloned().unwrap_or_default();
            rows.sort_by_key(|p| p.challenge_goal_id);
            for p in rows {
                let target_key = (keeper.id, p.challenge_goal_id);
                let merged = match prog_state.get(&target_key) {
                    Some(existing) => merge_completion(
                        (existing.is_complete, existing.completed_at),
                        (p.is_complete, p.completed_at),
                    ),
                    None => (p.is_complete, p.completed_at),
                };
                let row = ProgressRow {
                    career_challenge_id: keeper.id,
                    challenge_goal_id: p.challenge_goal_id,
                    is_complete: merged.0,
                    completed_at: merged.1,
                };
                prog_state.insert(target_key, row.clone());
                prog_state.remove(&(loser.id, p.challenge_goal_id));
                group.actions.push(RepairAction::WriteProgress(row));
                group.actions.push(RepairAction::DeleteProgress {
                    career_challenge_id: loser.id,
                    challenge_goal_id: p.challenge_goal_id,
                });
            }
            group.actions.push(RepairAction::DeleteCareerChallenge {
                career_challenge_id: loser.id,
            });
        }
        plans.push(group);
    }
    plans
}

async fn apply_plans(
    ctx: &MigrationContext,
    plans: Vec<RepairGroup>,
    step: &str,
) -> Result<StepCounters> {
    let mut counters = StepCounters::default();
    for group in &plans {
        info!(
            key = %group.key,
            keeper = group.keeper_id,
            losers = ?group.loser_ids,
            "merging duplicate group"
        );
        match ctx.target.apply_repair(group).await {
            Ok(()) => counters.updated += 1,
            Err(err) => {
                // Isolated by the per-group transaction; keep repairing the rest.
                error!(key = %group.key, %err, "duplicate group repair failed");
                counters.errors += 1;
            }
        }
    }
    counters.report(step);
    Ok(counters)
}

#[instrument(skip(ctx))]
pub async fn run_challenges(ctx: &MigrationContext) -> Result<StepCounters> {
    let challenges = ctx.target.challenge_rows().await?;
    let goals = ctx.target.challenge_goal_rows().await?;
    let progress = ctx.target.progress_rows().await?;
    let career = ctx.target.career_challenge_rows().await?;
    let plans = plan_challenge_repair(&challenges, &goals, &progress, &career);
    let counters = apply_plans(ctx, plans, "dedup-challenges").await?;

    let after = ctx.target.challenge_rows().await?;
    let distinct = after.iter().map(|c| &c.name).unique().count();
    if after.len() != distinct {
        anyhow::bail!(
            "challenge dedup postcondition violated: {} rows, {} distinct names",
            after.len(),
            distinct
        );
    }
    Ok(counters)
}

#[instrument(skip(ctx))]
pub async fn run_career_challenges(ctx: &MigrationContext) -> Result<StepCounters> {
    let career = ctx.target.career_challenge_rows().await?;
    let progress = ctx.target.progress_rows().await?;
    let plans = plan_career_challenge_repair(&career, &progress);
    let counters = apply_plans(ctx, plans, "dedup-career-challenges").await?;

    let after = ctx.target.career_challenge_rows().await?;
    let distinct = after
        .iter()
        .map(|c| (c.user_id.clone(), c.challenge_id, c.save_id.clone()))
        .unique()
        .count();
    if after.len() != distinct {
        anyhow::bail!(
            "career challenge dedup postcondition violated: {} rows, {} distinct keys",
            after.len(),
            distinct
        );
    }
    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn challenge(id: i64, name: &str, created: &str) -> ChallengeRec {
        ChallengeRec {
            id,
            name: name.to_string(),
            created_at: ts(created),
        }
    }

    fn goal(id: i64, challenge_id: i64, desc: &str) -> GoalRec {
        GoalRec {
            id,
            challenge_id,
            source_key: format!("g{id}"),
            description: desc.to_string(),
            competition_id: None,
            country_code: None,
        }
    }

    #[test]
    fn keeper_is_lowest_id_then_earliest_created() {
        let challenges = vec![
            challenge(7, "Treble Winner", "2024-01-02T00:00:00Z"),
            challenge(3, "Treble Winner", "2024-06-01T00:00:00Z"),
        ];
        let plans = plan_challenge_repair(&challenges, &[], &[], &[]);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].keeper_id, 3);
        assert_eq!(plans[0].loser_ids, vec![7]);
    }

    #[test]
    fn disjoint_goal_sets_union_under_keeper() {
        let challenges = vec![
            challenge(1, "Treble Winner", "2024-01-01T00:00:00Z"),
            challenge(2, "Treble Winner", "2024-01-02T00:00:00Z"),
        ];
        let goals = vec![
            goal(10, 1, "Win the league"),
            goal(11, 1, "Win the cup"),
            goal(12, 2, "Win the continental cup"),
        ];
        let plans = plan_challenge_repair(&challenges, &goals, &[], &[]);
        let actions = &plans[0].actions;
        assert!(actions.contains(&RepairAction::RepointGoal {
            goal_id: 12,
            challenge_id: 1
        }));
        assert!(actions.contains(&RepairAction::DeleteChallenge { challenge_id: 2 }));
        assert!(!actions.iter().any(|a| matches!(a, RepairAction::DeleteGoal { .. })));
    }

    #[test]
    fn identical_goal_is_discarded_and_progress_repointed() {
        let challenges = vec![
            challenge(1, "Invincibles", "2024-01-01T00:00:00Z"),
            challenge(2, "Invincibles", "2024-01-02T00:00:00Z"),
        ];
        let goals = vec![goal(10, 1, "Unbeaten season"), goal(11, 2, "Unbeaten season")];
        let progress = vec![ProgressRow {
            career_challenge_id: 100,
            challenge_goal_id: 11,
            is_complete: true,
            completed_at: Some(ts("2024-05-01T00:00:00Z")),
        }];
        let plans = plan_challenge_repair(&challenges, &goals, &progress, &[]);
        let actions = &plans[0].actions;
        assert!(actions.contains(&RepairAction::WriteProgress(ProgressRow {
            career_challenge_id: 100,
            challenge_goal_id: 10,
            is_complete: true,
            completed_at: Some(ts("2024-05-01T00:00:00Z")),
        })));
        assert!(actions.contains(&RepairAction::DeleteProgress {
            career_challenge_id: 100,
            challenge_goal_id: 11
        }));
        assert!(actions.contains(&RepairAction::DeleteGoal { goal_id: 11 }));
    }

    fn cc(id: i64, challenge_id: i64, started: &str) -> CareerChallengeRec {
        CareerChallengeRec {
            id,
            user_id: "u1".into(),
            challenge_id,
            save_id: "s1".into(),
            started_at: ts(started),
        }
    }

    #[test]
    fn career_challenge_on_keepers_save_merges_instead_of_repointing() {
        // Re-pointing cc 101 would collide with cc 100 on
        // (user, challenge, save), so its progress folds into cc 100.
        let challenges = vec![
            challenge(1, "Invincibles", "2024-01-01T00:00:00Z"),
            challenge(2, "Invincibles", "2024-01-02T00:00:00Z"),
        ];
        let goals = vec![goal(10, 1, "Unbeaten season"), goal(11, 2, "Unbeaten season")];
        let career = vec![
            cc(100, 1, "2024-01-01T00:00:00Z"),
            cc(101, 2, "2024-01-02T00:00:00Z"),
        ];
        let progress = vec![
            ProgressRow {
                career_challenge_id: 100,
                challenge_goal_id: 10,
                is_complete: false,
                completed_at: None,
            },
            ProgressRow {
                career_challenge_id: 101,
                challenge_goal_id: 11,
                is_complete: true,
                completed_at: Some(ts("2024-05-01T00:00:00Z")),
            },
        ];
        let plans = plan_challenge_repair(&challenges, &goals, &progress, &career);
        let actions = &plans[0].actions;
        assert!(!actions
            .iter()
            .any(|a| matches!(a, RepairAction::RepointCareerChallenge { .. })));
        assert!(actions.contains(&RepairAction::WriteProgress(ProgressRow {
            career_challenge_id: 100,
            challenge_goal_id: 10,
            is_complete: true,
            completed_at: Some(ts("2024-05-01T00:00:00Z")),
        })));
        assert!(actions
            .contains(&RepairAction::DeleteCareerChallenge { career_challenge_id: 101 }));
        assert!(actions.contains(&RepairAction::DeleteChallenge { challenge_id: 2 }));
    }

    #[test]
    fn career_challenge_on_another_save_is_repointed() {
        let challenges = vec![
            challenge(1, "Invincibles", "2024-01-01T00:00:00Z"),
            challenge(2, "Invincibles", "2024-01-02T00:00:00Z"),
        ];
        let career = vec![CareerChallengeRec {
            id: 101,
            user_id: "u2".into(),
            challenge_id: 2,
            save_id: "s9".into(),
            started_at: ts("2024-01-02T00:00:00Z"),
        }];
        let plans = plan_challenge_repair(&challenges, &[], &[], &career);
        assert!(plans[0].actions.contains(&RepairAction::RepointCareerChallenge {
            career_challenge_id: 101,
            challenge_id: 1,
        }));
    }

    #[test]
    fn progress_or_merge_keeps_completion_and_earliest_timestamp() {
        let career = vec![
            CareerChallengeRec {
                id: 1,
                user_id: "u1".into(),
                challenge_id: 5,
                save_id: "s1".into(),
                started_at: ts("2024-01-01T00:00:00Z"),
            },
            CareerChallengeRec {
                id: 2,
                user_id: "u1".into(),
                challenge_id: 5,
                save_id: "s1".into(),
                started_at: ts("2024-02-01T00:00:00Z"),
            },
        ];
        let progress = vec![
            ProgressRow {
                career_challenge_id: 1,
                challenge_goal_id: 9,
                is_complete: false,
                completed_at: None,
            },
            ProgressRow {
                career_challenge_id: 2,
                challenge_goal_id: 9,
                is_complete: true,
                completed_at: Some(ts("2024-05-01T00:00:00Z")),
            },
        ];
        let plans = plan_career_challenge_repair(&career, &progress);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].keeper_id, 1);
        assert!(plans[0].actions.contains(&RepairAction::WriteProgress(ProgressRow {
            career_challenge_id: 1,
            challenge_goal_id: 9,
            is_complete: true,
            completed_at: Some(ts("2024-05-01T00:00:00Z")),
        })));
        assert!(plans[0]
            .actions
            .contains(&RepairAction::DeleteCareerChallenge { career_challenge_id: 2 }));
    }

    #[test]
    fn earliest_non_null_timestamp_wins_on_both_sides() {
        let merged = merge_completion(
            (true, Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())),
            (true, Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())),
        );
        assert!(merged.0);
        assert_eq!(
            merged.1,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn unique_rows_produce_no_plans() {
        let challenges = vec![
            challenge(1, "A", "2024-01-01T00:00:00Z"),
            challenge(2, "B", "2024-01-01T00:00:00Z"),
        ];
        assert!(plan_challenge_repair(&challenges, &[], &[], &[]).is_empty());
    }
}
