use anyhow::Result;
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument, warn};

use super::{parse_numeric_id, StepCounters};
use crate::context::MigrationContext;
use crate::migrate::competitions::tier_from_priority;
use crate::source::{collections, SourceStore};
use crate::source::records::{ChallengeDoc, RawCompetitionDoc};
use crate::store::{ApiCompetitionRow, CompetitionGroupRow, TargetStore};

/// Competitions referenced by challenge goals but absent from the curated
/// set are synthesized from the broader raw catalog, so a later re-run of the
/// challenge catalog migration can resolve the dangling references.
#[instrument(skip(ctx))]
pub async fn run(ctx: &MigrationContext) -> Result<StepCounters> {
    let mut counters = StepCounters::default();

    let mut referenced: HashSet<i64> = HashSet::new();
    for doc in ctx.source.collection(collections::CHALLENGES).await? {
        let rec = match ChallengeDoc::parse(&doc) {
            Ok(rec) => rec,
            Err(err) => {
                counters.skip(&err);
                continue;
            }
        };
        for goal in &rec.goals {
            if let Some(raw) = &goal.competition_id {
                match parse_numeric_id(&doc.path, "competitionId", raw) {
                    Ok(id) => {
                        referenced.insert(id);
                    }
                    Err(err) => counters.field_warning(&err),
                }
            }
        }
    }

    let covered: HashSet<i64> = ctx
        .target
        .competition_links()
        .await?
        .into_iter()
        .map(|(_, api_id)| api_id)
        .collect();
    let mut missing: Vec<i64> = referenced.difference(&covered).copied().collect();
    missing.sort_unstable();
    if missing.is_empty() {
        info!("no competition gaps to fill");
        counters.report("competition-gap-fill");
        return Ok(counters);
    }

    let mut raw_catalog: HashMap<i64, RawCompetitionDoc> = HashMap::new();
    for doc in ctx.source.collection(collections::RAW_COMPETITIONS).await? {
        if let Ok(rec) = RawCompetitionDoc::parse(&doc) {
            raw_catalog.insert(rec.id, rec);
        }
    }
    let api_ids = ctx.target.api_competition_ids().await?;

    let mut unmatched: Vec<i64> = Vec::new();
    for id in missing {
        let rec = match raw_catalog.get(&id) {
            Some(rec) if rec.applicable => rec,
            _ => {
                unmatched.push(id);
                continue;
            }
        };
        let (group_id, group_created) = ctx
            .target
            .find_or_create_competition_group(&CompetitionGroupRow {
                name: rec.name.clone(),
                display_name: rec.name.clone(),
                country_code: rec.country_code.clone(),
                kind: rec.kind.clone(),
                tier: tier_from_priority(rec.priority),
                is_active: rec.is_active,
            })
            .await?;
        if !api_ids.contains(&rec.id) {
            ctx.target
                .upsert_api_competition(&ApiCompetitionRow {
                    id: rec.id,
                    name: rec.name.clone(),
                    country_code: rec.country_code.clone(),
                    kind: rec.kind.clone(),
                    tier: Some(tier_from_priority(rec.priority)),
                    is_active: rec.is_active,
                })
                .await?;
        }
        let linked = ctx.target.link_group_api(group_id, rec.id).await?;
        counters.tally_created(group_created || linked);
        info!(api_competition = rec.id, group = group_id, "gap filled");
    }

    if !unmatched.is_empty() {
        // Genuinely orphaned references; these need manual review.
        warn!(ids = ?unmatched, "challenge goals reference competitions with no raw catalog match");
        counters.errors += unmatched.len() as u64;
    }
    counters.report("competition-gap-fill");
    Ok(counters)
}
