use anyhow::Result;
use std::collections::HashSet;
use tracing::{instrument, warn};

use super::StepCounters;
use crate::context::MigrationContext;
use crate::errors::RecordError;
use crate::resolver::RefMaps;
use crate::source::records::{AdminCompetitionDoc, RawCompetitionDoc};
use crate::source::{collections, SourceStore};
use crate::store::{ApiCompetitionRow, CompetitionGroupRow, TargetStore};

/// Tier bucket from a provider priority value.
pub fn tier_from_priority(priority: Option<i64>) -> i64 {
    match priority {
        Some(p) if (0..=100).contains(&p) => 1,
        Some(p) if (101..=300).contains(&p) => 2,
        Some(p) if (301..=500).contains(&p) => 3,
        _ => 4,
    }
}

/// Tier for one admin-curated record: explicit group order wins when the
/// record is grouped, else the priority bucket.
pub fn tier_for(rec: &AdminCompetitionDoc) -> i64 {
    if rec.grouped {
        if let Some(order) = rec.group_order {
            return order.max(1);
        }
    }
    tier_from_priority(rec.priority)
}

/// Phase 1: import the raw provider catalog into api_competitions, keyed by
/// the provider's numeric id.
#[instrument(skip(ctx))]
pub async fn run_api(ctx: &MigrationContext) -> Result<StepCounters> {
    let maps = RefMaps::load(ctx.target.as_ref()).await?;
    let mut counters = StepCounters::default();
    for doc in ctx.source.collection(collections::RAW_COMPETITIONS).await? {
        let rec = match RawCompetitionDoc::parse(&doc) {
            Ok(rec) => rec,
            Err(err) => {
                counters.skip(&err);
                continue;
            }
        };
        if !maps.country_exists(&rec.country_code) {
            counters.skip(&RecordError::unresolved(
                &doc.path,
                "country",
                &rec.country_code,
            ));
            continue;
        }
        let outcome = ctx
            .target
            .upsert_api_competition(&ApiCompetitionRow {
                id: rec.id,
                name: rec.name,
                country_code: rec.country_code,
                kind: rec.kind,
                tier: Some(tier_from_priority(rec.priority)),
                is_active: rec.is_active,
            })
            .await?;
        counters.tally(outcome);
    }
    counters.report("api-competitions");
    Ok(counters)
}

/// Phase 2: cluster admin-curated records on (countryCode, effective name,
/// type) and materialize one competition group per cluster. Ungrouped
/// records become singleton groups.
#[instrument(skip(ctx))]
pub async fn run_groups(ctx: &MigrationContext) -> Result<StepCounters> {
    let maps = RefMaps::load(ctx.target.as_ref()).await?;
    let mut counters = StepCounters::default();

    let mut clusters: Vec<(String, String, String)> = Vec::new();
    let mut best_tier: std::collections::HashMap<(String, String, String), i64> =
        std::collections::HashMap::new();
    let mut any_active: std::collections::HashMap<(String, String, String), bool> =
        std::collections::HashMap::new();

    for doc in ctx.source.collection(collections::COMPETITIONS).await? {
        let rec = match AdminCompetitionDoc::parse(&doc) {
            Ok(rec) => rec,
            Err(err) => {
                counters.skip(&err);
                continue;
            }
        };
        if !maps.country_exists(&rec.country_code) {
            counters.skip(&RecordError::unresolved(
                &doc.path,
                "country",
                &rec.country_code,
            ));
            continue;
        }
        let key = (
            rec.country_code.clone(),
            rec.effective_name().to_string(),
            rec.kind.clone(),
        );
        let tier = tier_for(&rec);
        match best_tier.get_mut(&key) {
            Some(existing) => *existing = (*existing).min(tier),
            None => {
                best_tier.insert(key.clone(), tier);
                clusters.push(key.clone());
            }
        }
        *any_active.entry(key).or_insert(false) |= rec.is_active;
    }

    for key in clusters {
        let tier = best_tier[&key];
        let is_active = any_active[&key];
        let (country_code, name, kind) = key;
        let (_, created) = ctx
            .target
            .find_or_create_competition_group(&CompetitionGroupRow {
                name: name.clone(),
                display_name: name,
                country_code,
                kind,
                tier,
                is_active,
            })
            .await?;
        counters.tally_created(created);
    }
    counters.report("competition-groups");
    Ok(counters)
}

/// Phase 3: junction rows linking each admin-curated record's external id to
/// its computed group. Orphans on either side are reported, never silently
/// dropped.
#[instrument(skip(ctx))]
pub async fn run_links(ctx: &MigrationContext) -> Result<StepCounters> {
    let mut counters = StepCounters::default();
    let api_ids = ctx.target.api_competition_ids().await?;
    let mut linked: HashSet<i64> = ctx
        .target
        .competition_links()
        .await?
        .into_iter()
        .map(|(_, api_id)| api_id)
        .collect();

    for doc in ctx.source.collection(collections::COMPETITIONS).await? {
        let rec = match AdminCompetitionDoc::parse(&doc) {
            Ok(rec) => rec,
            Err(err) => {
                counters.skip(&err);
                continue;
            }
        };
        if !api_ids.contains(&rec.external_id) {
            counters.skip(&RecordError::unresolved(
                &doc.path,
                "api competition",
                rec.external_id,
            ));
            continue;
        }
        let group_id = match ctx
            .target
            .find_competition_group(&rec.country_code, rec.effective_name(), &rec.kind)
            .await?
        {
            Some(id) => id,
            None => {
                // Grouping target missing: phase 2 never saw this record.
                counters.skip(&RecordError::unresolved(
                    &doc.path,
                    "competition group",
                    rec.effective_name(),
                ));
                continue;
            }
        };
        let created = ctx.target.link_group_api(group_id, rec.external_id).await?;
        counters.tally_created(created);
        linked.insert(rec.external_id);
    }

    let unreferenced: Vec<i64> = api_ids.difference(&linked).copied().collect();
    if !unreferenced.is_empty() {
        warn!(
            count = unreferenced.len(),
            "api competitions not referenced by any group"
        );
    }
    counters.report("competition-links");
    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_bucket_boundaries() {
        assert_eq!(tier_from_priority(Some(0)), 1);
        assert_eq!(tier_from_priority(Some(100)), 1);
        assert_eq!(tier_from_priority(Some(101)), 2);
        assert_eq!(tier_from_priority(Some(300)), 2);
        assert_eq!(tier_from_priority(Some(301)), 3);
        assert_eq!(tier_from_priority(Some(500)), 3);
        assert_eq!(tier_from_priority(Some(501)), 4);
        assert_eq!(tier_from_priority(None), 4);
    }

    #[test]
    fn explicit_group_order_wins_and_is_clamped() {
        let rec = AdminCompetitionDoc {
            external_id: 1,
            name: "Premier Division".into(),
            country_code: "IE".into(),
            kind: "league".into(),
            priority: Some(400),
            grouped: true,
            group_name: Some("League of Ireland".into()),
            group_order: Some(0),
            is_active: true,
        };
        assert_eq!(tier_for(&rec), 1);

        let ungrouped = AdminCompetitionDoc {
            grouped: false,
            ..rec
        };
        assert_eq!(tier_for(&ungrouped), 3);
    }
}
