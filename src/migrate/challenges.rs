use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use tracing::instrument;

use super::{parse_numeric_id, StepCounters};
use crate::context::MigrationContext;
use crate::errors::RecordError;
use crate::resolver::RefMaps;
use crate::source::records::{ChallengeDoc, ChallengeProgressDoc};
use crate::source::{collections, subcollections, SourceStore};
use crate::store::{CareerChallengeRow, ChallengeGoalRow, ChallengeRow, ProgressRow, TargetStore};

const FETCH_CONCURRENCY: usize = 8;

/// Phase 1: challenge templates and their goals.
#[instrument(skip(ctx))]
pub async fn run_catalog(ctx: &MigrationContext) -> Result<StepCounters> {
    let maps = RefMaps::load(ctx.target.as_ref()).await?;
    let mut counters = StepCounters::default();

    for doc in ctx.source.collection(collections::CHALLENGES).await? {
        let rec = match ChallengeDoc::parse(&doc) {
            Ok(rec) => rec,
            Err(err) => {
                counters.skip(&err);
                continue;
            }
        };
        let (challenge_id, outcome) = ctx
            .target
            .upsert_challenge(&ChallengeRow {
                name: rec.name,
                description: rec.description,
                bonus: rec.bonus,
            })
            .await?;
        counters.tally(outcome);

        for goal in &rec.goals {
            let competition_id = match &goal.competition_id {
                None => None,
                Some(raw) => match parse_numeric_id(&doc.path, "competitionId", raw) {
                    Ok(api_id) => match maps.group_for_api_competition(api_id) {
                        Some(group_id) => Some(group_id),
                        None => {
                            // Optional FK: nulled now, gap-filler may make a
                            // later re-run resolve it.
                            counters.field_warning(&RecordError::unresolved(
                                &doc.path,
                                "competition",
                                api_id,
                            ));
                            None
                        }
                    },
                    Err(err) => {
                        counters.field_warning(&err);
                        None
                    }
                },
            };
            let country_code = match &goal.country_id {
                None => None,
                Some(code) if maps.country_exists(code) => Some(code.clone()),
                Some(code) => {
                    counters.field_warning(&RecordError::unresolved(&doc.path, "country", code));
                    None
                }
            };
            let (goal_id, goal_outcome) = ctx
                .target
                .upsert_challenge_goal(&ChallengeGoalRow {
                    challenge_id,
                    source_key: goal.id.clone(),
                    description: goal.description.clone(),
                    competition_id,
                    country_code,
                })
                .await?;
            counters.tally(goal_outcome);

            for raw in &goal.team_ids {
                match parse_numeric_id(&doc.path, "teams", raw) {
                    Ok(team_id) if maps.team_exists(team_id) => {
                        ctx.target.add_challenge_goal_team(goal_id, team_id).await?;
                    }
                    // Unresolved team links are dropped, never fatal to the goal.
                    Ok(team_id) => {
                        counters.field_warning(&RecordError::unresolved(
                            &doc.path,
                            "team",
                            team_id,
                        ));
                    }
                    Err(err) => counters.field_warning(&err),
                }
            }
        }
    }
    counters.report("challenge-catalog");
    Ok(counters)
}

/// Phase 2: per-user challenge progress, matched to the catalog by name.
#[instrument(skip(ctx))]
pub async fn run_progress(ctx: &MigrationContext) -> Result<StepCounters> {
    let mut counters = StepCounters::default();

    // name -> surrogate id; lowest id wins where legacy duplicates linger.
    let mut by_name: HashMap<String, i64> = HashMap::new();
    for rec in ctx.target.challenge_rows().await? {
        by_name.entry(rec.name).or_insert(rec.id);
    }

    for uid in ctx.source.user_ids().await? {
        let saves = ctx.source.saves(&uid).await?;
        let mut fetches = stream::iter(saves)
            .map(|save| {
                let source = ctx.source.clone();
                let uid = uid.clone();
                async move {
                    let docs = source
                        .save_subcollection(&uid, &save.id, subcollections::CHALLENGES)
                        .await;
                    (save.id, docs)
                }
            })
            .buffered(FETCH_CONCURRENCY);

        while let Some((save_id, docs)) = fetches.next().await {
            let save_ref = match ctx.target.save_ref(&save_id).await? {
                Some(r) => r,
                None => {
                    let path = format!("users/{uid}/saves/{save_id}");
                    counters.skip(&RecordError::unresolved(&path, "save", &save_id));
                    continue;
                }
            };
            for doc in docs? {
                let rec = match ChallengeProgressDoc::parse(&doc) {
                    Ok(rec) => rec,
                    Err(err) => {
                        counters.skip(&err);
                        continue;
                    }
                };
                let challenge_id = match by_name.get(&rec.name) {
                    Some(id) => *id,
                    None => {
                        counters.skip(&RecordError::unresolved(&doc.path, "challenge", &rec.name));
                        continue;
                    }
                };
                let (career_id, created) = ctx
                    .target
                    .find_or_create_career_challenge(&CareerChallengeRow {
                        user_id: uid.clone(),
                        challenge_id,
                        save_id: save_id.clone(),
                        game_id: save_ref.game_id,
                        started_at: rec.started_at,
                        completed_at: rec.completed_at,
                    })
                    .await?;
                counters.tally_created(created);
                if !created {
                    ctx.target
                        .update_career_challenge(career_id, rec.started_at, rec.completed_at)
                        .await?;
                }

                // One progress row per catalog goal, complete when the goal's
                // source id appears in the record's completed set.
                for goal in ctx.target.goals_for_challenge(challenge_id).await? {
                    let is_complete = rec.completed_goals.contains(&goal.source_key);
                    let outcome = ctx
                        .target
                        .upsert_progress(&ProgressRow {
                            career_challenge_id: career_id,
                            challenge_goal_id: goal.id,
                            is_complete,
                            completed_at: if is_complete { rec.completed_at } else { None },
                        })
                        .await?;
                    counters.tally(outcome);
                }
            }
        }
    }
    counters.report("challenge-progress");
    Ok(counters)
}
