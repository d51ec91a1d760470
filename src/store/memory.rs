use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;
use std::sync::Mutex;

use super::{
    ApiCompetitionRow, CareerChallengeRec, CareerChallengeRow, CareerStintRow, ChallengeGoalRow,
    ChallengeRec, ChallengeRow, CompetitionGroupRow, CountryRow, CupResultRow, GameRow, GoalRec,
    LeagueResultRow, Outcome, ProgressRow, RepairAction, RepairGroup, SaveRef, SaveRow, SeasonRow,
    TargetStore, TeamRow, TrophyRow,
};

#[derive(Debug, Clone)]
struct StoredChallenge {
    name: String,
    description: Option<String>,
    bonus: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    countries: IndexMap<String, CountryRow>,
    games: IndexMap<i64, GameRow>,
    teams: IndexMap<i64, TeamRow>,
    api_competitions: IndexMap<i64, ApiCompetitionRow>,
    groups: IndexMap<i64, CompetitionGroupRow>,
    links: IndexSet<(i64, i64)>,
    users: IndexSet<String>,
    saves: IndexMap<String, SaveRow>,
    career_stints: IndexMap<i64, CareerStintRow>,
    seasons: IndexMap<i64, SeasonRow>,
    league_results: IndexMap<(i64, i64), LeagueResultRow>,
    cup_results: IndexMap<(i64, i64), CupResultRow>,
    challenges: IndexMap<i64, StoredChallenge>,
    goals: IndexMap<i64, GoalRec>,
    goal_teams: IndexSet<(i64, i64)>,
    career_challenges: IndexMap<i64, CareerChallengeRow>,
    progress: IndexMap<(i64, i64), ProgressRow>,
    trophies: IndexMap<i64, TrophyRow>,
    next_id: i64,
}

impl Inner {
    fn alloc(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory target store for tests. Surrogate ids come from a single shared
/// sequence, so "lowest id" ordering across tables matches Postgres serials
/// closely enough for the dedup pass.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- seeding helpers for dedup tests: insert rows verbatim, bypassing
    // the natural-key upserts, the way legacy non-idempotent runs did.

    pub fn seed_challenge(&self, name: &str, created_at: DateTime<Utc>) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.alloc();
        inner.challenges.insert(
            id,
            StoredChallenge {
                name: name.to_string(),
                description: None,
                bonus: None,
                created_at,
            },
        );
        id
    }

    pub fn seed_goal(&self, row: &ChallengeGoalRow) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.alloc();
        inner.goals.insert(
            id,
            GoalRec {
                id,
                challenge_id: row.challenge_id,
                source_key: row.source_key.clone(),
                description: row.description.clone(),
                competition_id: row.competition_id,
                country_code: row.country_code.clone(),
            },
        );
        id
    }

    pub fn seed_career_challenge(&self, row: &CareerChallengeRow) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.alloc();
        inner.career_challenges.insert(id, row.clone());
        id
    }

    pub fn seed_progress(&self, row: &ProgressRow) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .progress
            .insert((row.career_challenge_id, row.challenge_goal_id), row.clone());
    }

    pub fn career_stint_count(&self) -> usize {
        self.inner.lock().unwrap().career_stints.len()
    }

    pub fn season_results(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        (inner.league_results.len(), inner.cup_results.len())
    }

    pub fn save_row(&self, id: &str) -> Option<SaveRow> {
        self.inner.lock().unwrap().saves.get(id).cloned()
    }

    pub fn career_challenge_completed_at(&self, id: i64) -> Option<Option<DateTime<Utc>>> {
        self.inner
            .lock()
            .unwrap()
            .career_challenges
            .get(&id)
            .map(|r| r.completed_at)
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn upsert_country(&self, row: &CountryRow) -> Result<Outcome> {
        let mut inner = self.inner.lock().unwrap();
        let outcome = if inner.countries.contains_key(&row.code) {
            Outcome::Updated
        } else {
            Outcome::Created
        };
        inner.countries.insert(row.code.clone(), row.clone());
        Ok(outcome)
    }

    async fn upsert_game(&self, row: &GameRow) -> Result<(i64, Outcome)> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner
            .games
            .iter()
            .find(|(_, g)| g.name == row.name)
            .map(|(id, _)| *id)
        {
            inner.games.insert(id, row.clone());
            return Ok((id, Outcome::Updated));
        }
        let id = inner.alloc();
        inner.games.insert(id, row.clone());
        Ok((id, Outcome::Created))
    }

    async fn upsert_team(&self, row: &TeamRow) -> Result<Outcome> {
        let mut inner = self.inner.lock().unwrap();
        let outcome = if inner.teams.contains_key(&row.id) {
            Outcome::Updated
        } else {
            Outcome::Created
        };
        inner.teams.insert(row.id, row.clone());
        Ok(outcome)
    }

    async fn upsert_api_competition(&self, row: &ApiCompetitionRow) -> Result<Outcome> {
        let mut inner = self.inner.lock().unwrap();
        let outcome = if inner.api_competitions.contains_key(&row.id) {
            Outcome::Updated
        } else {
            Outcome::Created
        };
        inner.api_competitions.insert(row.id, row.clone());
        Ok(outcome)
    }

    async fn find_or_create_competition_group(
        &self,
        row: &CompetitionGroupRow,
    ) -> Result<(i64, bool)> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner
            .groups
            .iter()
            .find(|(_, g)| {
                g.country_code == row.country_code && g.name == row.name && g.kind == row.kind
            })
            .map(|(id, _)| *id)
        {
            return Ok((id, false));
        }
        let id = inner.alloc();
        inner.groups.insert(id, row.clone());
        Ok((id, true))
    }

    async fn find_competition_group(
        &self,
        country_code: &str,
        name: &str,
        kind: &str,
    ) -> Result<Option<i64>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .groups
            .iter()
            .find(|(_, g)| g.country_code == country_code && g.name == name && g.kind == kind)
            .map(|(id, _)| *id))
    }

    async fn link_group_api(&self, group_id: i64, api_competition_id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.links.insert((group_id, api_competition_id)))
    }

    async fn upsert_user(&self, uid: &str) -> Result<Outcome> {
        let mut inner = self.inner.lock().unwrap();
        Ok(if inner.users.insert(uid.to_string()) {
            Outcome::Created
        } else {
            Outcome::Updated
        })
    }

    async fn upsert_save(&self, row: &SaveRow) -> Result<Outcome> {
        let mut inner = self.inner.lock().unwrap();
        let outcome = if inner.saves.contains_key(&row.id) {
            Outcome::Updated
        } else {
            Outcome::Created
        };
        inner.saves.insert(row.id.clone(), row.clone());
        Ok(outcome)
    }

    async fn save_ref(&self, save_id: &str) -> Result<Option<SaveRef>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.saves.get(save_id).map(|s| SaveRef {
            user_id: s.user_id.clone(),
            game_id: s.game_id,
        }))
    }

    async fn upsert_career_stint(&self, row: &CareerStintRow) -> Result<Outcome> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner
            .career_stints
            .iter()
            .find(|(_, s)| {
                s.save_id == row.save_id
                    && s.team_id == row.team_id
                    && s.start_date == row.start_date
            })
            .map(|(id, _)| *id)
        {
            inner.career_stints.insert(id, row.clone());
            return Ok(Outcome::Updated);
        }
        let id = inner.alloc();
        inner.career_stints.insert(id, row.clone());
        Ok(Outcome::Created)
    }

    async fn find_or_create_season(&self, row: &SeasonRow) -> Result<(i64, bool)> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner
            .seasons
            .iter()
            .find(|(_, s)| {
                s.save_id == row.save_id && s.team_id == row.team_id && s.season == row.season
            })
            .map(|(id, _)| *id)
        {
            return Ok((id, false));
        }
        let id = inner.alloc();
        inner.seasons.insert(id, row.clone());
        Ok((id, true))
    }

    async fn upsert_league_result(&self, row: &LeagueResultRow) -> Result<Outcome> {
        let mut inner = self.inner.lock().unwrap();
        let key = (row.season_id, row.competition_id);
        let outcome = if inner.league_results.contains_key(&key) {
            Outcome::Updated
        } else {
            Outcome::Created
        };
        inner.league_results.insert(key, row.clone());
        Ok(outcome)
    }

    async fn upsert_cup_result(&self, row: &CupResultRow) -> Result<Outcome> {
        let mut inner = self.inner.lock().unwrap();
        let key = (row.season_id, row.competition_id);
        let outcome = if inner.cup_results.contains_key(&key) {
            Outcome::Updated
        } else {
            Outcome::Created
        };
        inner.cup_results.insert(key, row.clone());
        Ok(outcome)
    }

    async fn find_or_create_trophy(&self, row: &TrophyRow) -> Result<(i64, bool)> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner
            .trophies
            .iter()
            .find(|(_, t)| {
                t.save_id == row.save_id
                    && t.competition_group_id == row.competition_group_id
                    && t.season == row.season
            })
            .map(|(id, _)| *id)
        {
            return Ok((id, false));
        }
        let id = inner.alloc();
        inner.trophies.insert(id, row.clone());
        Ok((id, true))
    }

    async fn upsert_challenge(&self, row: &ChallengeRow) -> Result<(i64, Outcome)> {
        let mut inner = self.inner.lock().unwrap();
        // Lowest id wins when legacy duplicates share the name.
        if let Some(id) = inner
            .challenges
            .iter()
            .filter(|(_, c)| c.name == row.name)
            .map(|(id, _)| *id)
            .min()
        {
            let created_at = inner.challenges[&id].created_at;
            inner.challenges.insert(
                id,
                StoredChallenge {
                    name: row.name.clone(),
                    description: row.description.clone(),
                    bonus: row.bonus.clone(),
                    created_at,
                },
            );
            return Ok((id, Outcome::Updated));
        }
        let id = inner.alloc();
        inner.challenges.insert(
            id,
            StoredChallenge {
                name: row.name.clone(),
                description: row.description.clone(),
                bonus: row.bonus.clone(),
                created_at: Utc::now(),
            },
        );
        Ok((id, Outcome::Created))
    }

    async fn upsert_challenge_goal(&self, row: &ChallengeGoalRow) -> Result<(i64, Outcome)> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner
            .goals
            .iter()
            .filter(|(_, g)| g.challenge_id == row.challenge_id && g.source_key == row.source_key)
            .map(|(id, _)| *id)
            .min()
        {
            inner.goals.insert(
                id,
                GoalRec {
                    id,
                    challenge_id: row.challenge_id,
                    source_key: row.source_key.clone(),
                    description: row.description.clone(),
                    competition_id: row.competition_id,
                    country_code: row.country_code.clone(),
                },
            );
            return Ok((id, Outcome::Updated));
        }
        let id = inner.alloc();
        inner.goals.insert(
            id,
            GoalRec {
                id,
                challenge_id: row.challenge_id,
                source_key: row.source_key.clone(),
                description: row.description.clone(),
                competition_id: row.competition_id,
                country_code: row.country_code.clone(),
            },
        );
        Ok((id, Outcome::Created))
    }

    async fn add_challenge_goal_team(&self, goal_id: i64, team_id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.goal_teams.insert((goal_id, team_id)))
    }

    async fn find_or_create_career_challenge(
        &self,
        row: &CareerChallengeRow,
    ) -> Result<(i64, bool)> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner
            .career_challenges
            .iter()
            .filter(|(_, c)| {
                c.user_id == row.user_id
                    && c.challenge_id == row.challenge_id
                    && c.save_id == row.save_id
            })
            .map(|(id, _)| *id)
            .min()
        {
            return Ok((id, false));
        }
        let id = inner.alloc();
        inner.career_challenges.insert(id, row.clone());
        Ok((id, true))
    }

    async fn update_career_challenge(
        &self,
        id: i64,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(row) = inner.career_challenges.get_mut(&id) {
            row.started_at = started_at;
            row.completed_at = completed_at;
        }
        Ok(())
    }

    async fn upsert_progress(&self, row: &ProgressRow) -> Result<Outcome> {
        let mut inner = self.inner.lock().unwrap();
        let key = (row.career_challenge_id, row.challenge_goal_id);
        let outcome = if inner.progress.contains_key(&key) {
            Outcome::Updated
        } else {
            Outcome::Created
        };
        inner.progress.insert(key, row.clone());
        Ok(outcome)
    }

    async fn country_codes(&self) -> Result<HashSet<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.countries.keys().cloned().collect())
    }

    async fn team_ids(&self) -> Result<HashSet<i64>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.teams.keys().copied().collect())
    }

    async fn game_names(&self) -> Result<Vec<(i64, String)>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .games
            .iter()
            .map(|(id, g)| (*id, g.name.clone()))
            .collect())
    }

    async fn api_competition_ids(&self) -> Result<HashSet<i64>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.api_competitions.keys().copied().collect())
    }

    async fn competition_group_ids(&self) -> Result<HashSet<i64>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.groups.keys().copied().collect())
    }

    async fn competition_links(&self) -> Result<Vec<(i64, i64)>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.links.iter().copied().collect())
    }

    async fn challenge_rows(&self) -> Result<Vec<ChallengeRec>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<ChallengeRec> = inner
            .challenges
            .iter()
            .map(|(id, c)| ChallengeRec {
                id: *id,
                name: c.name.clone(),
                created_at: c.created_at,
            })
            .collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    async fn challenge_goal_rows(&self) -> Result<Vec<GoalRec>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<GoalRec> = inner.goals.values().cloned().collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    async fn goals_for_challenge(&self, challenge_id: i64) -> Result<Vec<GoalRec>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<GoalRec> = inner
            .goals
            .values()
            .filter(|g| g.challenge_id == challenge_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    async fn career_challenge_rows(&self) -> Result<Vec<CareerChallengeRec>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<CareerChallengeRec> = inner
            .career_challenges
            .iter()
            .map(|(id, c)| CareerChallengeRec {
                id: *id,
                user_id: c.user_id.clone(),
                challenge_id: c.challenge_id,
                save_id: c.save_id.clone(),
                started_at: c.started_at,
            })
            .collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    async fn progress_rows(&self) -> Result<Vec<ProgressRow>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<ProgressRow> = inner.progress.values().cloned().collect();
        rows.sort_by_key(|r| (r.career_challenge_id, r.challenge_goal_id));
        Ok(rows)
    }

    async fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        let inner = self.inner.lock().unwrap();
        Ok(vec![
            ("countries", inner.countries.len() as i64),
            ("games", inner.games.len() as i64),
            ("teams", inner.teams.len() as i64),
            ("api_competitions", inner.api_competitions.len() as i64),
            ("competition_groups", inner.groups.len() as i64),
            (
                "competition_group_api_competitions",
                inner.links.len() as i64,
            ),
            ("users", inner.users.len() as i64),
            ("saves", inner.saves.len() as i64),
            ("career_stints", inner.career_stints.len() as i64),
            ("seasons", inner.seasons.len() as i64),
            ("league_results", inner.league_results.len() as i64),
            ("cup_results", inner.cup_results.len() as i64),
            ("challenges", inner.challenges.len() as i64),
            ("challenge_goals", inner.goals.len() as i64),
            ("challenge_goal_teams", inner.goal_teams.len() as i64),
            ("career_challenges", inner.career_challenges.len() as i64),
            ("career_challenge_goals", inner.progress.len() as i64),
            ("trophies", inner.trophies.len() as i64),
        ])
    }

    async fn apply_repair(&self, group: &RepairGroup) -> Result<()> {
        // Memory writes cannot fail halfway, so sequential application is
        // already all-or-nothing.
        let mut inner = self.inner.lock().unwrap();
        for action in &group.actions {
            match action {
                RepairAction::RepointGoal {
                    goal_id,
                    challenge_id,
                } => {
                    if let Some(g) = inner.goals.get_mut(goal_id) {
                        g.challenge_id = *challenge_id;
                    }
                }
                RepairAction::DeleteGoal { goal_id } => {
                    inner.goals.shift_remove(goal_id);
                    inner.goal_teams.retain(|(g, _)| g != goal_id);
                }
                RepairAction::WriteProgress(row) => {
                    inner
                        .progress
                        .insert((row.career_challenge_id, row.challenge_goal_id), row.clone());
                }
                RepairAction::DeleteProgress {
                    career_challenge_id,
                    challenge_goal_id,
                } => {
                    inner
                        .progress
                        .shift_remove(&(*career_challenge_id, *challenge_goal_id));
                }
                RepairAction::RepointCareerChallenge {
                    career_challenge_id,
                    challenge_id,
                } => {
                    if let Some(c) = inner.career_challenges.get_mut(career_challenge_id) {
                        c.challenge_id = *challenge_id;
                    }
                }
                RepairAction::DeleteChallenge { challenge_id } => {
                    inner.challenges.shift_remove(challenge_id);
                }
                RepairAction::DeleteCareerChallenge {
                    career_challenge_id,
                } => {
                    inner.career_challenges.shift_remove(career_challenge_id);
                }
            }
        }
        Ok(())
    }
}
