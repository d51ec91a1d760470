//! End-to-end runs against the in-memory source and target stores, covering
//! the full step catalog, idempotent re-runs, gap filling, and duplicate
//! repair.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;

use fm_career_migrate::context::MigrationContext;
use fm_career_migrate::orchestrator::{catalog, run_steps, RunSummary};
use fm_career_migrate::resolver::GAME_ALIASES;
use fm_career_migrate::source::MemorySource;
use fm_career_migrate::store::{
    CareerChallengeRow, ChallengeGoalRow, MemoryStore, ProgressRow, TargetStore,
};
use fm_career_migrate::validate;

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// One user, one save, a three-goal challenge, and a competition (907) that
/// only the raw provider catalog knows about.
fn fixture() -> MemorySource {
    let mut src = MemorySource::new();

    src.put_doc("countries", "EN", json!({"name": "England", "inFootballManager": true}));
    src.put_doc("countries", "NL", json!({"name": "Netherlands", "inFootballManager": true}));

    // Every alias canonical must exist once the games table is populated.
    for (i, (_, canonical)) in GAME_ALIASES.iter().enumerate() {
        src.put_doc("games", &format!("game{i}"), json!({"name": canonical}));
    }

    src.put_doc("teams", "10", json!({"name": "Arsenal", "countryCode": "en"}));
    src.put_doc("teams", "20", json!({"name": "Ajax", "countryCode": "nl", "national": false}));

    src.put_doc(
        "raw_competitions",
        "39",
        json!({"name": "Premier League", "countryCode": "EN", "type": "league", "priority": 50, "inFootballManager": true}),
    );
    src.put_doc(
        "raw_competitions",
        "45",
        json!({"name": "FA Cup", "countryCode": "EN", "type": "cup", "priority": 120, "inFootballManager": true}),
    );
    // In the raw catalog but deliberately not admin-curated.
    src.put_doc(
        "raw_competitions",
        "907",
        json!({"name": "Eredivisie", "countryCode": "NL", "type": "league", "priority": 60, "inFootballManager": true}),
    );

    src.put_doc(
        "competitions",
        "39",
        json!({"externalId": "39", "name": "Premier League", "countryCode": "en", "type": "league", "priority": 50}),
    );
    src.put_doc(
        "competitions",
        "45",
        json!({"externalId": 45, "name": "FA Cup", "countryCode": "EN", "type": "cup", "priority": 120}),
    );

    src.put_doc(
        "challenges",
        "treble",
        json!({
            "name": "Treble Winner",
            "description": "Win everything in one season",
            "goals": [
                {"id": "g1", "description": "Win the league", "competitionId": "39"},
                {"id": "g2", "description": "Win the cup", "competitionId": 45},
                {"id": "g3", "description": "Win the Eredivisie", "competitionId": "907", "countryId": "nl", "teams": ["20"]},
            ],
        }),
    );

    src.put_save(
        "userA",
        "save1",
        json!({
            "game": "fm24",
            "name": "My Career",
            "currentClub": "10",
            "currentLeague": "39",
            "currentDate": "2024-08-01",
        }),
    );
    src.put_save_doc(
        "userA",
        "save1",
        "career",
        "c1",
        json!({"teamId": "10", "startDate": "2023-07-01"}),
    );
    src.put_save_doc(
        "userA",
        "save1",
        "seasons",
        "s1",
        json!({
            "teamId": "10",
            "season": "2023/24",
            "leagueResults": [{"competitionId": "39", "position": 1, "promoted": false}],
            "cupResults": [{"competitionId": 45, "reachedRound": "Final"}],
        }),
    );
    src.put_save_doc(
        "userA",
        "save1",
        "challenges",
        "p1",
        json!({
            "name": "Treble Winner",
            "startedAt": "2024-01-01T00:00:00Z",
            "completedGoals": ["g2"],
        }),
    );
    src.put_save_doc(
        "userA",
        "save1",
        "trophies",
        "t1",
        json!({"teamId": "10", "competitionId": "39", "season": "2023/24"}),
    );
    src
}

fn ctx_with(source: MemorySource, store: Arc<MemoryStore>) -> MigrationContext {
    MigrationContext::new(Arc::new(source), store)
}

fn names(selected: &[&str]) -> Vec<String> {
    selected.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn full_catalog_migrates_the_whole_export() {
    let store = Arc::new(MemoryStore::new());
    let ctx = ctx_with(fixture(), store.clone());

    let summary = run_steps(&ctx, &catalog(), &[], false).await.unwrap();
    assert!(summary.ok());

    let save = store.save_row("save1").expect("save migrated");
    assert_eq!(save.user_id, "userA");
    assert_eq!(save.current_club_id, Some(10));
    assert!(save.current_league_id.is_some());
    assert_eq!(store.career_stint_count(), 1);
    assert_eq!(store.season_results(), (1, 1));

    // The gap-filler runs before the challenge catalog, so even the goal
    // referencing the non-curated competition 907 resolves on the first run.
    let goals = ctx.target.challenge_goal_rows().await.unwrap();
    assert_eq!(goals.len(), 3);
    assert!(goals.iter().all(|g| g.competition_id.is_some()));

    let progress = ctx.target.progress_rows().await.unwrap();
    assert_eq!(progress.len(), 3, "one progress row per catalog goal");
    let complete: Vec<_> = progress.iter().filter(|p| p.is_complete).collect();
    assert_eq!(complete.len(), 1);
    assert_eq!(complete[0].completed_at, None);

    let career = ctx.target.career_challenge_rows().await.unwrap();
    assert_eq!(career.len(), 1);
    assert_eq!(
        store.career_challenge_completed_at(career[0].id),
        Some(None),
        "partially completed challenge stays open"
    );

    let report = validate::orphan_report(&ctx).await.unwrap();
    assert!(report.is_clean(), "integrity report not clean: {report:?}");
}

#[tokio::test]
async fn second_run_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let ctx = ctx_with(fixture(), store.clone());

    run_steps(&ctx, &catalog(), &[], false).await.unwrap();
    let counts_first = ctx.target.table_counts().await.unwrap();
    let progress_first = ctx.target.progress_rows().await.unwrap();

    let summary = run_steps(&ctx, &catalog(), &[], false).await.unwrap();
    assert!(summary.ok());
    assert_eq!(ctx.target.table_counts().await.unwrap(), counts_first);
    assert_eq!(ctx.target.progress_rows().await.unwrap(), progress_first);
}

#[tokio::test]
async fn save_with_unknown_game_is_skipped_not_fatal() {
    let mut src = fixture();
    src.put_save("userB", "save2", json!({"game": "fm99"}));

    let store = Arc::new(MemoryStore::new());
    let ctx = ctx_with(src, store.clone());
    let summary = run_steps(&ctx, &catalog(), &[], false).await.unwrap();
    assert!(summary.ok());
    assert!(store.save_row("save2").is_none());
    assert!(store.save_row("save1").is_some());

    // The absent parent row surfaces as a counted skip in every step that
    // hangs data off the save, not as a silent pass.
    for step in ["career-stints", "seasons", "challenge-progress", "trophies"] {
        assert_eq!(skipped(&summary, step), 1, "step {step}");
    }
}

fn skipped(summary: &RunSummary, name: &str) -> u64 {
    summary
        .completed
        .iter()
        .find(|(n, _)| *n == name)
        .unwrap_or_else(|| panic!("step {name} did not complete"))
        .1
        .skipped
}

#[tokio::test]
async fn gap_fill_backfills_challenge_competitions_for_a_rerun() {
    let store = Arc::new(MemoryStore::new());
    let ctx = ctx_with(fixture(), store.clone());

    // Everything up to the challenge catalog, but no gap fill: goal g3's
    // competition 907 is not covered and the FK is nulled.
    let selected = names(&[
        "countries",
        "games",
        "teams",
        "api-competitions",
        "competition-groups",
        "competition-links",
        "challenge-catalog",
    ]);
    let summary = run_steps(&ctx, &catalog(), &selected, false).await.unwrap();
    assert!(summary.ok());
    assert!(summary.totals.errors > 0, "dangling reference is reported");
    let dangling = ctx
        .target
        .challenge_goal_rows()
        .await
        .unwrap()
        .into_iter()
        .filter(|g| g.competition_id.is_none())
        .count();
    assert_eq!(dangling, 1);

    // Gap fill synthesizes the group and junction row from the raw catalog;
    // re-running the catalog then resolves the reference.
    let summary = run_steps(
        &ctx,
        &catalog(),
        &names(&["competition-gap-fill", "challenge-catalog"]),
        false,
    )
    .await
    .unwrap();
    assert!(summary.ok());
    let goals = ctx.target.challenge_goal_rows().await.unwrap();
    assert_eq!(goals.len(), 3, "re-run upserts, never duplicates");
    assert!(goals.iter().all(|g| g.competition_id.is_some()));
    assert!(ctx
        .target
        .api_competition_ids()
        .await
        .unwrap()
        .contains(&907));
}

#[tokio::test]
async fn dedup_steps_collapse_legacy_duplicates() {
    let store = Arc::new(MemoryStore::new());

    // Two challenges sharing a name, the way legacy non-idempotent runs left
    // them: one shared goal, one goal unique to the duplicate.
    let keeper = store.seed_challenge("Invincibles", ts("2024-01-01T00:00:00Z"));
    let loser = store.seed_challenge("Invincibles", ts("2024-02-01T00:00:00Z"));
    let kept_goal = store.seed_goal(&ChallengeGoalRow {
        challenge_id: keeper,
        source_key: "g1".into(),
        description: "Unbeaten season".into(),
        competition_id: None,
        country_code: None,
    });
    let dup_goal = store.seed_goal(&ChallengeGoalRow {
        challenge_id: loser,
        source_key: "g1".into(),
        description: "Unbeaten season".into(),
        competition_id: None,
        country_code: None,
    });
    let extra_goal = store.seed_goal(&ChallengeGoalRow {
        challenge_id: loser,
        source_key: "g2".into(),
        description: "Win the title unbeaten".into(),
        competition_id: None,
        country_code: None,
    });

    // Duplicate career challenges for the same (user, challenge, save), with
    // progress split across them.
    let cc_keep = store.seed_career_challenge(&CareerChallengeRow {
        user_id: "userA".into(),
        challenge_id: keeper,
        save_id: "save1".into(),
        game_id: 1,
        started_at: ts("2024-01-05T00:00:00Z"),
        completed_at: None,
    });
    let cc_dup = store.seed_career_challenge(&CareerChallengeRow {
        user_id: "userA".into(),
        challenge_id: loser,
        save_id: "save1".into(),
        game_id: 1,
        started_at: ts("2024-02-05T00:00:00Z"),
        completed_at: None,
    });
    store.seed_progress(&ProgressRow {
        career_challenge_id: cc_keep,
        challenge_goal_id: kept_goal,
        is_complete: false,
        completed_at: None,
    });
    store.seed_progress(&ProgressRow {
        career_challenge_id: cc_dup,
        challenge_goal_id: dup_goal,
        is_complete: true,
        completed_at: Some(ts("2024-05-01T00:00:00Z")),
    });

    let ctx = ctx_with(MemorySource::new(), store.clone());
    let summary = run_steps(
        &ctx,
        &catalog(),
        &names(&["dedup-challenges", "dedup-career-challenges", "report"]),
        false,
    )
    .await
    .unwrap();
    assert!(summary.ok());

    let challenges = ctx.target.challenge_rows().await.unwrap();
    assert_eq!(challenges.len(), 1);
    assert_eq!(challenges[0].id, keeper);

    let goals = ctx.target.challenge_goal_rows().await.unwrap();
    assert_eq!(goals.len(), 2, "identical goal discarded, unique goal kept");
    assert!(goals.iter().all(|g| g.challenge_id == keeper));
    assert!(goals.iter().any(|g| g.id == kept_goal));
    assert!(goals.iter().any(|g| g.id == extra_goal));

    let career = ctx.target.career_challenge_rows().await.unwrap();
    assert_eq!(career.len(), 1);
    assert_eq!(career[0].id, cc_keep);

    // The surviving progress row carries the merged completion state.
    let progress = ctx.target.progress_rows().await.unwrap();
    assert_eq!(
        progress,
        vec![ProgressRow {
            career_challenge_id: cc_keep,
            challenge_goal_id: kept_goal,
            is_complete: true,
            completed_at: Some(ts("2024-05-01T00:00:00Z")),
        }]
    );

    let report = validate::orphan_report(&ctx).await.unwrap();
    assert!(report.is_clean(), "repair left orphans: {report:?}");
}

#[tokio::test]
async fn report_step_runs_standalone_on_an_empty_target() {
    let store = Arc::new(MemoryStore::new());
    let ctx = ctx_with(MemorySource::new(), store);
    let summary = run_steps(&ctx, &catalog(), &names(&["report"]), false)
        .await
        .unwrap();
    assert!(summary.ok());
    assert_eq!(summary.totals.errors, 0);
}
