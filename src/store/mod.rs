use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Outcome of an upsert-by-natural-key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
}

// --- write rows ----------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CountryRow {
    pub code: String,
    pub name: String,
    pub flag: Option<String>,
    pub in_football_manager: bool,
}

#[derive(Debug, Clone)]
pub struct GameRow {
    pub name: String,
    pub short_name: Option<String>,
    pub version: Option<String>,
    pub platform: Option<String>,
    pub variant: Option<String>,
    pub is_active: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone)]
pub struct TeamRow {
    pub id: i64,
    pub name: String,
    pub logo: Option<String>,
    pub national: bool,
    pub country_code: Option<String>,
    pub coordinates: Option<String>,
    pub is_female: bool,
}

#[derive(Debug, Clone)]
pub struct SaveRow {
    pub id: String,
    pub user_id: String,
    pub game_id: i64,
    pub name: Option<String>,
    pub current_club_id: Option<i64>,
    pub current_nt_id: Option<i64>,
    pub current_league_id: Option<i64>,
    pub current_date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct CareerStintRow {
    pub save_id: String,
    pub team_id: i64,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub is_national: bool,
}

#[derive(Debug, Clone)]
pub struct SeasonRow {
    pub save_id: String,
    pub team_id: i64,
    pub season: String,
}

#[derive(Debug, Clone)]
pub struct LeagueResultRow {
    pub season_id: i64,
    pub competition_id: i64,
    pub position: i64,
    pub promoted: bool,
    pub relegated: bool,
}

#[derive(Debug, Clone)]
pub struct CupResultRow {
    pub season_id: i64,
    pub competition_id: i64,
    pub reached_round: String,
}

#[derive(Debug, Clone)]
pub struct ApiCompetitionRow {
    /// External provider id, used as the primary key verbatim.
    pub id: i64,
    pub name: String,
    pub country_code: String,
    pub kind: String,
    pub tier: Option<i64>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct CompetitionGroupRow {
    pub name: String,
    pub display_name: String,
    pub country_code: String,
    pub kind: String,
    pub tier: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct ChallengeRow {
    pub name: String,
    pub description: Option<String>,
    pub bonus: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChallengeGoalRow {
    pub challenge_id: i64,
    /// Document id of the goal inside the source challenge template. Progress
    /// records reference goals by this id, so it is persisted to keep the
    /// catalog and progress phases independently re-runnable.
    pub source_key: String,
    pub description: String,
    pub competition_id: Option<i64>,
    pub country_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CareerChallengeRow {
    pub user_id: String,
    pub challenge_id: i64,
    pub save_id: String,
    pub game_id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRow {
    pub career_challenge_id: i64,
    pub challenge_goal_id: i64,
    pub is_complete: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct TrophyRow {
    pub save_id: String,
    pub team_id: i64,
    pub competition_group_id: i64,
    pub season: String,
}

// --- read-back records ---------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChallengeRec {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct GoalRec {
    pub id: i64,
    pub challenge_id: i64,
    pub source_key: String,
    pub description: String,
    pub competition_id: Option<i64>,
    pub country_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CareerChallengeRec {
    pub id: i64,
    pub user_id: String,
    pub challenge_id: i64,
    pub save_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SaveRef {
    pub user_id: String,
    pub game_id: i64,
}

// --- deduplication repair plans ------------------------------------------

/// Primitive writes the repair pass issues. A `RepairGroup` is one duplicate
/// group's full reconciliation and is applied atomically; groups are
/// independent of each other.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairAction {
    /// Re-point a goal at the keeper challenge.
    RepointGoal { goal_id: i64, challenge_id: i64 },
    DeleteGoal { goal_id: i64 },
    /// Write a progress row with exactly these fields (insert or overwrite).
    WriteProgress(ProgressRow),
    DeleteProgress {
        career_challenge_id: i64,
        challenge_goal_id: i64,
    },
    /// Re-point a career challenge at the keeper challenge. Only planned
    /// when the keeper has no career challenge for the same (user, save);
    /// otherwise the planner merges progress and deletes the loser row.
    RepointCareerChallenge {
        career_challenge_id: i64,
        challenge_id: i64,
    },
    DeleteChallenge { challenge_id: i64 },
    DeleteCareerChallenge { career_challenge_id: i64 },
}

#[derive(Debug, Clone, Default)]
pub struct RepairGroup {
    /// Human-readable uniqueness key, for the audit log.
    pub key: String,
    pub keeper_id: i64,
    pub loser_ids: Vec<i64>,
    pub actions: Vec<RepairAction>,
}

// --- the target store seam -----------------------------------------------

/// Relational target store. One implementation talks Postgres, one is an
/// in-memory fake for tests; migrators are written against this trait only.
#[async_trait]
pub trait TargetStore: Send + Sync {
    // reference data
    async fn upsert_country(&self, row: &CountryRow) -> Result<Outcome>;
    async fn upsert_game(&self, row: &GameRow) -> Result<(i64, Outcome)>;
    async fn upsert_team(&self, row: &TeamRow) -> Result<Outcome>;
    async fn upsert_api_competition(&self, row: &ApiCompetitionRow) -> Result<Outcome>;
    async fn find_or_create_competition_group(
        &self,
        row: &CompetitionGroupRow,
    ) -> Result<(i64, bool)>;
    async fn find_competition_group(
        &self,
        country_code: &str,
        name: &str,
        kind: &str,
    ) -> Result<Option<i64>>;
    /// Insert a junction row if absent; returns whether it was created.
    async fn link_group_api(&self, group_id: i64, api_competition_id: i64) -> Result<bool>;

    // per-user data
    async fn upsert_user(&self, uid: &str) -> Result<Outcome>;
    async fn upsert_save(&self, row: &SaveRow) -> Result<Outcome>;
    async fn save_ref(&self, save_id: &str) -> Result<Option<SaveRef>>;
    async fn upsert_career_stint(&self, row: &CareerStintRow) -> Result<Outcome>;
    async fn find_or_create_season(&self, row: &SeasonRow) -> Result<(i64, bool)>;
    async fn upsert_league_result(&self, row: &LeagueResultRow) -> Result<Outcome>;
    async fn upsert_cup_result(&self, row: &CupResultRow) -> Result<Outcome>;
    async fn find_or_create_trophy(&self, row: &TrophyRow) -> Result<(i64, bool)>;

    // challenges
    async fn upsert_challenge(&self, row: &ChallengeRow) -> Result<(i64, Outcome)>;
    async fn upsert_challenge_goal(&self, row: &ChallengeGoalRow) -> Result<(i64, Outcome)>;
    async fn add_challenge_goal_team(&self, goal_id: i64, team_id: i64) -> Result<bool>;
    async fn find_or_create_career_challenge(
        &self,
        row: &CareerChallengeRow,
    ) -> Result<(i64, bool)>;
    async fn update_career_challenge(
        &self,
        id: i64,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn upsert_progress(&self, row: &ProgressRow) -> Result<Outcome>;

    // snapshots for the resolver, validators, and dedup pass
    async fn country_codes(&self) -> Result<HashSet<String>>;
    async fn team_ids(&self) -> Result<HashSet<i64>>;
    async fn game_names(&self) -> Result<Vec<(i64, String)>>;
    async fn api_competition_ids(&self) -> Result<HashSet<i64>>;
    async fn competition_group_ids(&self) -> Result<HashSet<i64>>;
    /// Junction pairs (competition_group_id, api_competition_id).
    async fn competition_links(&self) -> Result<Vec<(i64, i64)>>;
    async fn challenge_rows(&self) -> Result<Vec<ChallengeRec>>;
    async fn challenge_goal_rows(&self) -> Result<Vec<GoalRec>>;
    async fn goals_for_challenge(&self, challenge_id: i64) -> Result<Vec<GoalRec>>;
    async fn career_challenge_rows(&self) -> Result<Vec<CareerChallengeRec>>;
    async fn progress_rows(&self) -> Result<Vec<ProgressRow>>;
    async fn table_counts(&self) -> Result<Vec<(&'static str, i64)>>;

    /// Apply one duplicate group's repair atomically: either every action in
    /// the group lands or none do.
    async fn apply_repair(&self, group: &RepairGroup) -> Result<()>;
}
