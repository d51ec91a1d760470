use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

use super::{
    ApiCompetitionRow, CareerChallengeRec, CareerChallengeRow, CareerStintRow, ChallengeGoalRow,
    ChallengeRec, ChallengeRow, CompetitionGroupRow, CountryRow, CupResultRow, GameRow, GoalRec,
    LeagueResultRow,
    Outcome, ProgressRow, RepairAction, RepairGroup, SaveRef, SaveRow, SeasonRow, TargetStore,
    TeamRow, TrophyRow,
};

/// Relational target store backed by Postgres.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32, auto_migrate: bool) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)?;
        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await
            .context("connecting to target database")?;
        info!("connected to target db");

        // Default off: production schemas are managed by the app's own tooling.
        if auto_migrate {
            info!("AUTO_MIGRATE on; applying target schema");
            sqlx::migrate!("./migrations").run(&pool).await?;
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const COUNTED_TABLES: &[&str] = &[
    "countries",
    "games",
    "teams",
    "api_competitions",
    "competition_groups",
    "competition_group_api_competitions",
    "users",
    "saves",
    "career_stints",
    "seasons",
    "league_results",
    "cup_results",
    "challenges",
    "challenge_goals",
    "challenge_goal_teams",
    "career_challenges",
    "career_challenge_goals",
    "trophies",
];

#[async_trait]
impl TargetStore for PgStore {
    async fn upsert_country(&self, row: &CountryRow) -> Result<Outcome> {
        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM countries WHERE code = $1")
            .bind(&row.code)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_some() {
            sqlx::query(
                "UPDATE countries SET name = $2, flag = $3, in_football_manager = $4 WHERE code = $1",
            )
            .bind(&row.code)
            .bind(&row.name)
            .bind(&row.flag)
            .bind(row.in_football_manager)
            .execute(&self.pool)
            .await?;
            Ok(Outcome::Updated)
        } else {
            sqlx::query(
                "INSERT INTO countries (code, name, flag, in_football_manager) VALUES ($1, $2, $3, $4)",
            )
            .bind(&row.code)
            .bind(&row.name)
            .bind(&row.flag)
            .bind(row.in_football_manager)
            .execute(&self.pool)
            .await?;
            Ok(Outcome::Created)
        }
    }

    async fn upsert_game(&self, row: &GameRow) -> Result<(i64, Outcome)> {
        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM games WHERE name = $1")
            .bind(&row.name)
            .fetch_optional(&self.pool)
            .await?;
        match existing {
            Some(id) => {
                sqlx::query(
                    "UPDATE games SET short_name = $2, version = $3, platform = $4, variant = $5,
                     is_active = $6, sort_order = $7 WHERE id = $1",
                )
                .bind(id)
                .bind(&row.short_name)
                .bind(&row.version)
                .bind(&row.platform)
                .bind(&row.variant)
                .bind(row.is_active)
                .bind(row.sort_order)
                .execute(&self.pool)
                .await?;
                Ok((id, Outcome::Updated))
            }
            None => {
                let id: i64 = sqlx::query_scalar(
                    "INSERT INTO games (name, short_name, version, platform, variant, is_active, sort_order)
                     VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
                )
                .bind(&row.name)
                .bind(&row.short_name)
                .bind(&row.version)
                .bind(&row.platform)
                .bind(&row.variant)
                .bind(row.is_active)
                .bind(row.sort_order)
                .fetch_one(&self.pool)
                .await?;
                Ok((id, Outcome::Created))
            }
        }
    }

    async fn upsert_team(&self, row: &TeamRow) -> Result<Outcome> {
        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM teams WHERE id = $1")
            .bind(row.id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_some() {
            sqlx::query(
                "UPDATE teams SET name = $2, logo = $3, national = $4, country_code = $5,
                 coordinates = $6, is_female = $7 WHERE id = $1",
            )
            .bind(row.id)
            .bind(&row.name)
            .bind(&row.logo)
            .bind(row.national)
            .bind(&row.country_code)
            .bind(&row.coordinates)
            .bind(row.is_female)
            .execute(&self.pool)
            .await?;
            Ok(Outcome::Updated)
        } else {
            sqlx::query(
                "INSERT INTO teams (id, name, logo, national, country_code, coordinates, is_female)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(row.id)
            .bind(&row.name)
            .bind(&row.logo)
            .bind(row.national)
            .bind(&row.country_code)
            .bind(&row.coordinates)
            .bind(row.is_female)
            .execute(&self.pool)
            .await?;
            Ok(Outcome::Created)
        }
    }

    async fn upsert_api_competition(&self, row: &ApiCompetitionRow) -> Result<Outcome> {
        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM api_competitions WHERE id = $1")
            .bind(row.id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_some() {
            sqlx::query(
                "UPDATE api_competitions SET name = $2, country_code = $3, type = $4, tier = $5,
                 is_active = $6 WHERE id = $1",
            )
            .bind(row.id)
            .bind(&row.name)
            .bind(&row.country_code)
            .bind(&row.kind)
            .bind(row.tier)
            .bind(row.is_active)
            .execute(&self.pool)
            .await?;
            Ok(Outcome::Updated)
        } else {
            sqlx::query(
                "INSERT INTO api_competitions (id, name, country_code, type, tier, is_active)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(row.id)
            .bind(&row.name)
            .bind(&row.country_code)
            .bind(&row.kind)
            .bind(row.tier)
            .bind(row.is_active)
            .execute(&self.pool)
            .await?;
            Ok(Outcome::Created)
        }
    }

    async fn find_or_create_competition_group(
        &self,
        row: &CompetitionGroupRow,
    ) -> Result<(i64, bool)> {
        if let Some(id) = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM competition_groups WHERE country_code = $1 AND name = $2 AND type = $3",
        )
        .bind(&row.country_code)
        .bind(&row.name)
        .bind(&row.kind)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok((id, false));
        }
        let inserted: Option<i64> = sqlx::query_scalar(
            "INSERT INTO competition_groups (name, display_name, country_code, type, tier, is_active)
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT DO NOTHING RETURNING id",
        )
        .bind(&row.name)
        .bind(&row.display_name)
        .bind(&row.country_code)
        .bind(&row.kind)
        .bind(row.tier)
        .bind(row.is_active)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(id) = inserted {
            return Ok((id, true));
        }
        let id: i64 = sqlx::query_scalar(
            "SELECT id FROM competition_groups WHERE country_code = $1 AND name = $2 AND type = $3",
        )
        .bind(&row.country_code)
        .bind(&row.name)
        .bind(&row.kind)
        .fetch_one(&self.pool)
        .await?;
        Ok((id, false))
    }

    async fn find_competition_group(
        &self,
        country_code: &str,
        name: &str,
        kind: &str,
    ) -> Result<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM competition_groups WHERE country_code = $1 AND name = $2 AND type = $3",
        )
        .bind(country_code)
        .bind(name)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn link_group_api(&self, group_id: i64, api_competition_id: i64) -> Result<bool> {
        let res = sqlx::query(
            "INSERT INTO competition_group_api_competitions (competition_group_id, api_competition_id)
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(group_id)
        .bind(api_competition_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn upsert_user(&self, uid: &str) -> Result<Outcome> {
        let res = sqlx::query("INSERT INTO users (uid) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(if res.rows_affected() == 1 {
            Outcome::Created
        } else {
            Outcome::Updated
        })
    }

    async fn upsert_save(&self, row: &SaveRow) -> Result<Outcome> {
        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM saves WHERE id = $1")
            .bind(&row.id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_some() {
            sqlx::query(
                "UPDATE saves SET user_id = $2, game_id = $3, name = $4, current_club_id = $5,
                 current_nt_id = $6, current_league_id = $7, in_game_date = $8 WHERE id = $1",
            )
            .bind(&row.id)
            .bind(&row.user_id)
            .bind(row.game_id)
            .bind(&row.name)
            .bind(row.current_club_id)
            .bind(row.current_nt_id)
            .bind(row.current_league_id)
            .bind(row.current_date)
            .execute(&self.pool)
            .await?;
            Ok(Outcome::Updated)
        } else {
            sqlx::query(
                "INSERT INTO saves (id, user_id, game_id, name, current_club_id, current_nt_id,
                 current_league_id, in_game_date) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(&row.id)
            .bind(&row.user_id)
            .bind(row.game_id)
            .bind(&row.name)
            .bind(row.current_club_id)
            .bind(row.current_nt_id)
            .bind(row.current_league_id)
            .bind(row.current_date)
            .execute(&self.pool)
            .await?;
            Ok(Outcome::Created)
        }
    }

    async fn save_ref(&self, save_id: &str) -> Result<Option<SaveRef>> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT user_id, game_id FROM saves WHERE id = $1")
                .bind(save_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(user_id, game_id)| SaveRef { user_id, game_id }))
    }

    async fn upsert_career_stint(&self, row: &CareerStintRow) -> Result<Outcome> {
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM career_stints WHERE save_id = $1 AND team_id = $2 AND start_date = $3",
        )
        .bind(&row.save_id)
        .bind(row.team_id)
        .bind(row.start_date)
        .fetch_optional(&self.pool)
        .await?;
        match existing {
            Some(id) => {
                sqlx::query("UPDATE career_stints SET end_date = $2, is_national = $3 WHERE id = $1")
                    .bind(id)
                    .bind(row.end_date)
                    .bind(row.is_national)
                    .execute(&self.pool)
                    .await?;
                Ok(Outcome::Updated)
            }
            None => {
                sqlx::query(
                    "INSERT INTO career_stints (save_id, team_id, start_date, end_date, is_national)
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(&row.save_id)
                .bind(row.team_id)
                .bind(row.start_date)
                .bind(row.end_date)
                .bind(row.is_national)
                .execute(&self.pool)
                .await?;
                Ok(Outcome::Created)
            }
        }
    }

    async fn find_or_create_season(&self, row: &SeasonRow) -> Result<(i64, bool)> {
        if let Some(id) = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM seasons WHERE save_id = $1 AND team_id = $2 AND season = $3",
        )
        .bind(&row.save_id)
        .bind(row.team_id)
        .bind(&row.season)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok((id, false));
        }
        let inserted: Option<i64> = sqlx::query_scalar(
            "INSERT INTO seasons (save_id, team_id, season) VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING RETURNING id",
        )
        .bind(&row.save_id)
        .bind(row.team_id)
        .bind(&row.season)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(id) = inserted {
            return Ok((id, true));
        }
        // Lost the insert to a prior run; re-read.
        let id: i64 = sqlx::query_scalar(
            "SELECT id FROM seasons WHERE save_id = $1 AND team_id = $2 AND season = $3",
        )
        .bind(&row.save_id)
        .bind(row.team_id)
        .bind(&row.season)
        .fetch_one(&self.pool)
        .await?;
        Ok((id, false))
    }

    async fn upsert_league_result(&self, row: &LeagueResultRow) -> Result<Outcome> {
        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM league_results WHERE season_id = $1 AND competition_id = $2",
        )
        .bind(row.season_id)
        .bind(row.competition_id)
        .fetch_optional(&self.pool)
        .await?;
        if exists.is_some() {
            sqlx::query(
                "UPDATE league_results SET position = $3, promoted = $4, relegated = $5
                 WHERE season_id = $1 AND competition_id = $2",
            )
            .bind(row.season_id)
            .bind(row.competition_id)
            .bind(row.position)
            .bind(row.promoted)
            .bind(row.relegated)
            .execute(&self.pool)
            .await?;
            Ok(Outcome::Updated)
        } else {
            sqlx::query(
                "INSERT INTO league_results (season_id, competition_id, position, promoted, relegated)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(row.season_id)
            .bind(row.competition_id)
            .bind(row.position)
            .bind(row.promoted)
            .bind(row.relegated)
            .execute(&self.pool)
            .await?;
            Ok(Outcome::Created)
        }
    }

    async fn upsert_cup_result(&self, row: &CupResultRow) -> Result<Outcome> {
        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM cup_results WHERE season_id = $1 AND competition_id = $2",
        )
        .bind(row.season_id)
        .bind(row.competition_id)
        .fetch_optional(&self.pool)
        .await?;
        if exists.is_some() {
            sqlx::query(
                "UPDATE cup_results SET reached_round = $3 WHERE season_id = $1 AND competition_id = $2",
            )
            .bind(row.season_id)
            .bind(row.competition_id)
            .bind(&row.reached_round)
            .execute(&self.pool)
            .await?;
            Ok(Outcome::Updated)
        } else {
            sqlx::query(
                "INSERT INTO cup_results (season_id, competition_id, reached_round) VALUES ($1, $2, $3)",
            )
            .bind(row.season_id)
            .bind(row.competition_id)
            .bind(&row.reached_round)
            .execute(&self.pool)
            .await?;
            Ok(Outcome::Created)
        }
    }

    async fn find_or_create_trophy(&self, row: &TrophyRow) -> Result<(i64, bool)> {
        if let Some(id) = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM trophies WHERE save_id = $1 AND competition_group_id = $2 AND season = $3",
        )
        .bind(&row.save_id)
        .bind(row.competition_group_id)
        .bind(&row.season)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok((id, false));
        }
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO trophies (save_id, team_id, competition_group_id, season)
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&row.save_id)
        .bind(row.team_id)
        .bind(row.competition_group_id)
        .bind(&row.season)
        .fetch_one(&self.pool)
        .await?;
        Ok((id, true))
    }

    async fn upsert_challenge(&self, row: &ChallengeRow) -> Result<(i64, Outcome)> {
        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM challenges WHERE name = $1")
            .bind(&row.name)
            .fetch_optional(&self.pool)
            .await?;
        match existing {
            Some(id) => {
                sqlx::query("UPDATE challenges SET description = $2, bonus = $3 WHERE id = $1")
                    .bind(id)
                    .bind(&row.description)
                    .bind(&row.bonus)
                    .execute(&self.pool)
                    .await?;
                Ok((id, Outcome::Updated))
            }
            None => {
                let id: i64 = sqlx::query_scalar(
                    "INSERT INTO challenges (name, description, bonus) VALUES ($1, $2, $3) RETURNING id",
                )
                .bind(&row.name)
                .bind(&row.description)
                .bind(&row.bonus)
                .fetch_one(&self.pool)
                .await?;
                Ok((id, Outcome::Created))
            }
        }
    }

    async fn upsert_challenge_goal(&self, row: &ChallengeGoalRow) -> Result<(i64, Outcome)> {
        // Legacy stores may hold duplicate goals; take the lowest id, the
        // same choice the dedup pass makes.
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM challenge_goals WHERE challenge_id = $1 AND source_key = $2
             ORDER BY id LIMIT 1",
        )
        .bind(row.challenge_id)
        .bind(&row.source_key)
        .fetch_optional(&self.pool)
        .await?;
        match existing {
            Some(id) => {
                sqlx::query(
                    "UPDATE challenge_goals SET description = $2, competition_id = $3, country_code = $4
                     WHERE id = $1",
                )
                .bind(id)
                .bind(&row.description)
                .bind(row.competition_id)
                .bind(&row.country_code)
                .execute(&self.pool)
                .await?;
                Ok((id, Outcome::Updated))
            }
            None => {
                let id: i64 = sqlx::query_scalar(
                    "INSERT INTO challenge_goals (challenge_id, source_key, description, competition_id, country_code)
                     VALUES ($1, $2, $3, $4, $5) RETURNING id",
                )
                .bind(row.challenge_id)
                .bind(&row.source_key)
                .bind(&row.description)
                .bind(row.competition_id)
                .bind(&row.country_code)
                .fetch_one(&self.pool)
                .await?;
                Ok((id, Outcome::Created))
            }
        }
    }

    async fn add_challenge_goal_team(&self, goal_id: i64, team_id: i64) -> Result<bool> {
        let res = sqlx::query(
            "INSERT INTO challenge_goal_teams (challenge_goal_id, team_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(goal_id)
        .bind(team_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn find_or_create_career_challenge(
        &self,
        row: &CareerChallengeRow,
    ) -> Result<(i64, bool)> {
        if let Some(id) = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM career_challenges
             WHERE user_id = $1 AND challenge_id = $2 AND save_id = $3 ORDER BY id LIMIT 1",
        )
        .bind(&row.user_id)
        .bind(row.challenge_id)
        .bind(&row.save_id)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok((id, false));
        }
        let inserted: Option<i64> = sqlx::query_scalar(
            "INSERT INTO career_challenges (user_id, challenge_id, save_id, game_id, started_at, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT DO NOTHING RETURNING id",
        )
        .bind(&row.user_id)
        .bind(row.challenge_id)
        .bind(&row.save_id)
        .bind(row.game_id)
        .bind(row.started_at)
        .bind(row.completed_at)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(id) = inserted {
            return Ok((id, true));
        }
        // Uniqueness conflict means a prior run already created the row;
        // re-read it and treat it as the target.
        let id: i64 = sqlx::query_scalar(
            "SELECT id FROM career_challenges
             WHERE user_id = $1 AND challenge_id = $2 AND save_id = $3 ORDER BY id LIMIT 1",
        )
        .bind(&row.user_id)
        .bind(row.challenge_id)
        .bind(&row.save_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((id, false))
    }

    async fn update_career_challenge(
        &self,
        id: i64,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query("UPDATE career_challenges SET started_at = $2, completed_at = $3 WHERE id = $1")
            .bind(id)
            .bind(started_at)
            .bind(completed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_progress(&self, row: &ProgressRow) -> Result<Outcome> {
        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM career_challenge_goals
             WHERE career_challenge_id = $1 AND challenge_goal_id = $2",
        )
        .bind(row.career_challenge_id)
        .bind(row.challenge_goal_id)
        .fetch_optional(&self.pool)
        .await?;
        if exists.is_some() {
            sqlx::query(
                "UPDATE career_challenge_goals SET is_complete = $3, completed_at = $4
                 WHERE career_challenge_id = $1 AND challenge_goal_id = $2",
            )
            .bind(row.career_challenge_id)
            .bind(row.challenge_goal_id)
            .bind(row.is_complete)
            .bind(row.completed_at)
            .execute(&self.pool)
            .await?;
            Ok(Outcome::Updated)
        } else {
            sqlx::query(
                "INSERT INTO career_challenge_goals (career_challenge_id, challenge_goal_id, is_complete, completed_at)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(row.career_challenge_id)
            .bind(row.challenge_goal_id)
            .bind(row.is_complete)
            .bind(row.completed_at)
            .execute(&self.pool)
            .await?;
            Ok(Outcome::Created)
        }
    }

    async fn country_codes(&self) -> Result<HashSet<String>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT code FROM countries")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn team_ids(&self) -> Result<HashSet<i64>> {
        let rows: Vec<i64> = sqlx::query_scalar("SELECT id FROM teams")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn game_names(&self) -> Result<Vec<(i64, String)>> {
        Ok(sqlx::query_as("SELECT id, name FROM games")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn api_competition_ids(&self) -> Result<HashSet<i64>> {
        let rows: Vec<i64> = sqlx::query_scalar("SELECT id FROM api_competitions")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn competition_group_ids(&self) -> Result<HashSet<i64>> {
        let rows: Vec<i64> = sqlx::query_scalar("SELECT id FROM competition_groups")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn competition_links(&self) -> Result<Vec<(i64, i64)>> {
        Ok(sqlx::query_as(
            "SELECT competition_group_id, api_competition_id FROM competition_group_api_competitions",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn challenge_rows(&self) -> Result<Vec<ChallengeRec>> {
        let rows: Vec<(i64, String, DateTime<Utc>)> =
            sqlx::query_as("SELECT id, name, created_at FROM challenges ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, created_at)| ChallengeRec {
                id,
                name,
                created_at,
            })
            .collect())
    }

    async fn challenge_goal_rows(&self) -> Result<Vec<GoalRec>> {
        let rows: Vec<(i64, i64, String, String, Option<i64>, Option<String>)> = sqlx::query_as(
            "SELECT id, challenge_id, source_key, description, competition_id, country_code
             FROM challenge_goals ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(goal_rec).collect())
    }

    async fn goals_for_challenge(&self, challenge_id: i64) -> Result<Vec<GoalRec>> {
        let rows: Vec<(i64, i64, String, String, Option<i64>, Option<String>)> = sqlx::query_as(
            "SELECT id, challenge_id, source_key, description, competition_id, country_code
             FROM challenge_goals WHERE challenge_id = $1 ORDER BY id",
        )
        .bind(challenge_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(goal_rec).collect())
    }

    async fn career_challenge_rows(&self) -> Result<Vec<CareerChallengeRec>> {
        let rows: Vec<(i64, String, i64, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, user_id, challenge_id, save_id, started_at FROM career_challenges ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, user_id, challenge_id, save_id, started_at)| CareerChallengeRec {
                id,
                user_id,
                challenge_id,
                save_id,
                started_at,
            })
            .collect())
    }

    async fn progress_rows(&self) -> Result<Vec<ProgressRow>> {
        let rows: Vec<(i64, i64, bool, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT career_challenge_id, challenge_goal_id, is_complete, completed_at
             FROM career_challenge_goals ORDER BY career_challenge_id, challenge_goal_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(
                |(career_challenge_id, challenge_goal_id, is_complete, completed_at)| ProgressRow {
                    career_challenge_id,
                    challenge_goal_id,
                    is_complete,
                    completed_at,
                },
            )
            .collect())
    }

    async fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        let mut out = Vec::with_capacity(COUNTED_TABLES.len());
        for table in COUNTED_TABLES {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await?;
            out.push((*table, count));
        }
        Ok(out)
    }

    #[instrument(skip(self, group), fields(key = %group.key, keeper = group.keeper_id))]
    async fn apply_repair(&self, group: &RepairGroup) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for action in &group.actions {
            match action {
                RepairAction::RepointGoal {
                    goal_id,
                    challenge_id,
                } => {
                    sqlx::query("UPDATE challenge_goals SET challenge_id = $2 WHERE id = $1")
                        .bind(goal_id)
                        .bind(challenge_id)
                        .execute(&mut *tx)
                        .await?;
                }
                RepairAction::DeleteGoal { goal_id } => {
                    sqlx::query("DELETE FROM challenge_goals WHERE id = $1")
                        .bind(goal_id)
                        .execute(&mut *tx)
                        .await?;
                }
                RepairAction::WriteProgress(row) => {
                    sqlx::query(
                        "INSERT INTO career_challenge_goals (career_challenge_id, challenge_goal_id, is_complete, completed_at)
                         VALUES ($1, $2, $3, $4)
                         ON CONFLICT (career_challenge_id, challenge_goal_id)
                         DO UPDATE SET is_complete = EXCLUDED.is_complete, completed_at = EXCLUDED.completed_at",
                    )
                    .bind(row.career_challenge_id)
                    .bind(row.challenge_goal_id)
                    .bind(row.is_complete)
                    .bind(row.completed_at)
                    .execute(&mut *tx)
                    .await?;
                }
                RepairAction::DeleteProgress {
                    career_challenge_id,
                    challenge_goal_id,
                } => {
                    sqlx::query(
                        "DELETE FROM career_challenge_goals
                         WHERE career_challenge_id = $1 AND challenge_goal_id = $2",
                    )
                    .bind(career_challenge_id)
                    .bind(challenge_goal_id)
                    .execute(&mut *tx)
                    .await?;
                }
                RepairAction::RepointCareerChallenge {
                    career_challenge_id,
                    challenge_id,
                } => {
                    sqlx::query("UPDATE career_challenges SET challenge_id = $2 WHERE id = $1")
                        .bind(career_challenge_id)
                        .bind(challenge_id)
                        .execute(&mut *tx)
                        .await?;
                }
                RepairAction::DeleteChallenge { challenge_id } => {
                    sqlx::query("DELETE FROM challenges WHERE id = $1")
                        .bind(challenge_id)
                        .execute(&mut *tx)
                        .await?;
                }
                RepairAction::DeleteCareerChallenge {
                    career_challenge_id,
                } => {
                    sqlx::query("DELETE FROM career_challenges WHERE id = $1")
                        .bind(career_challenge_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

fn goal_rec(row: (i64, i64, String, String, Option<i64>, Option<String>)) -> GoalRec {
    let (id, challenge_id, source_key, description, competition_id, country_code) = row;
    GoalRec {
        id,
        challenge_id,
        source_key,
        description,
        competition_id,
        country_code,
    }
}
