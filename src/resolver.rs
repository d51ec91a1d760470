//! Natural-key lookups against the target store. Maps are bulk-loaded once
//! per step; every lookup returns "not found" as a value, never an error —
//! the caller decides whether a miss is fatal for the record or just nulls
//! an optional foreign key.

use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::store::TargetStore;

/// Legacy short codes the old app accepted in save documents. Exhaustively
/// enumerated; an alias whose canonical game is missing from a populated
/// games table is a configuration error caught at load, not a silent
/// fallback to some default game.
pub const GAME_ALIASES: &[(&str, &str)] = &[
    ("fm24", "Football Manager 2024"),
    ("fm23", "Football Manager 2023"),
    ("fm22", "Football Manager 2022"),
    ("fmm24", "Football Manager 2024 Mobile"),
    ("fmt24", "Football Manager 2024 Touch"),
];

pub struct RefMaps {
    countries: HashSet<String>,
    teams: HashSet<i64>,
    /// external api competition id -> owning competition group id
    groups_by_api: HashMap<i64, i64>,
    /// lowercased game name -> surrogate id
    games: HashMap<String, i64>,
}

impl RefMaps {
    pub async fn load(target: &dyn TargetStore) -> Result<Self> {
        let countries = target.country_codes().await?;
        let teams = target.team_ids().await?;
        let groups_by_api = target
            .competition_links()
            .await?
            .into_iter()
            .map(|(group_id, api_id)| (api_id, group_id))
            .collect::<HashMap<_, _>>();
        let games: HashMap<String, i64> = target
            .game_names()
            .await?
            .into_iter()
            .map(|(id, name)| (name.trim().to_lowercase(), id))
            .collect();

        if !games.is_empty() {
            for (alias, canonical) in GAME_ALIASES {
                if !games.contains_key(&canonical.to_lowercase()) {
                    bail!(
                        "game alias `{alias}` maps to `{canonical}`, which is not in the games table; \
                         fix the alias table or migrate the missing game first"
                    );
                }
            }
        }

        debug!(
            countries = countries.len(),
            teams = teams.len(),
            linked_competitions = groups_by_api.len(),
            games = games.len(),
            "reference maps loaded"
        );
        Ok(Self {
            countries,
            teams,
            groups_by_api,
            games,
        })
    }

    pub fn country_exists(&self, code: &str) -> bool {
        self.countries.contains(code)
    }

    pub fn team_exists(&self, id: i64) -> bool {
        self.teams.contains(&id)
    }

    /// Owning competition group for an external provider competition id,
    /// resolved through the junction table.
    pub fn group_for_api_competition(&self, api_id: i64) -> Option<i64> {
        self.groups_by_api.get(&api_id).copied()
    }

    /// Case-insensitive game lookup, understanding the legacy aliases.
    pub fn game_id(&self, name: &str) -> Option<i64> {
        let key = name.trim().to_lowercase();
        if let Some(id) = self.games.get(&key) {
            return Some(*id);
        }
        GAME_ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .and_then(|(_, canonical)| self.games.get(&canonical.to_lowercase()))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{GameRow, MemoryStore, TargetStore};

    fn game(name: &str) -> GameRow {
        GameRow {
            name: name.to_string(),
            short_name: None,
            version: None,
            platform: None,
            variant: None,
            is_active: true,
            sort_order: 0,
        }
    }

    #[tokio::test]
    async fn resolves_names_case_insensitively_and_via_alias() {
        let store = MemoryStore::new();
        for (_, canonical) in GAME_ALIASES {
            store.upsert_game(&game(canonical)).await.unwrap();
        }
        let (id, _) = store
            .upsert_game(&game("Football Manager 2024"))
            .await
            .unwrap();

        let maps = RefMaps::load(&store).await.unwrap();
        assert_eq!(maps.game_id("football manager 2024"), Some(id));
        assert_eq!(maps.game_id("FM24"), Some(id));
        assert_eq!(maps.game_id("fm99"), None);
    }

    #[tokio::test]
    async fn misconfigured_alias_is_a_hard_error() {
        let store = MemoryStore::new();
        // Populated games table, but no Football Manager 2023 row.
        store.upsert_game(&game("Football Manager 2024")).await.unwrap();
        assert!(RefMaps::load(&store).await.is_err());
    }

    #[tokio::test]
    async fn empty_games_table_defers_alias_check() {
        // Before the games step has ever run there is nothing to check.
        let store = MemoryStore::new();
        let maps = RefMaps::load(&store).await.unwrap();
        assert_eq!(maps.game_id("fm24"), None);
    }
}
