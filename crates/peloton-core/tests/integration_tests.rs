// Integration tests for the scoring engine.
//
// These run whole seasons in miniature through the public API: catalog import,
// team building, race and stage reconciliation, league standings and remote
// sync, all against an in-memory database.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use peloton_core::config::SeasonConfig;
use peloton_core::db::Database;
use peloton_core::import;
use peloton_core::manager::TeamManager;
use peloton_core::model::{
    Chip, FantasyTeam, GcStanding, HistoryKind, Jerseys, LeagueMember, Race, RaceType,
    ResultStatus, StageResult, StageType, TeamRaceResult,
};
use peloton_core::remote::{RemoteClient, RemoteSync};
use peloton_core::roster::RosterError;
use peloton_core::{ProcessOutcome, ReconcileSummary, TeamReconciler};

// ===========================================================================
// Test helpers
// ===========================================================================

/// Fixture directory, relative to the crate root (the cwd for `cargo test`).
const FIXTURES: &str = "tests/fixtures";

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn season() -> SeasonConfig {
    SeasonConfig {
        year: 2026,
        name: "Test season".into(),
        ..SeasonConfig::default()
    }
}

fn race(id: &str, race_type: RaceType, start: &str, end: Option<&str>, stages: u32) -> Race {
    Race {
        id: id.into(),
        name: id.to_uppercase(),
        race_type,
        start_date: day(start),
        end_date: end.map(day),
        stages,
        country: "FRA".into(),
        season: 2026,
        is_finished: false,
        finished_at: None,
    }
}

/// Remote that records every document it is sent.
#[derive(Default)]
struct RecordingRemote {
    pushed: Mutex<Vec<String>>,
}

impl RecordingRemote {
    fn pushed(&self) -> Vec<String> {
        self.pushed.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteSync for RecordingRemote {
    async fn push_team(&self, team: &FantasyTeam) -> Result<()> {
        self.pushed.lock().unwrap().push(format!("team:{}", team.id));
        Ok(())
    }

    async fn push_team_result(&self, result: &TeamRaceResult) -> Result<()> {
        self.pushed
            .lock()
            .unwrap()
            .push(format!("history:{}:{}", result.team_id, result.race_id));
        Ok(())
    }

    async fn push_league_members(&self, league_id: &str, _members: &[LeagueMember]) -> Result<()> {
        self.pushed.lock().unwrap().push(format!("league:{league_id}"));
        Ok(())
    }
}

/// Remote that is always down.
struct FailingRemote;

#[async_trait]
impl RemoteSync for FailingRemote {
    async fn push_team(&self, _team: &FantasyTeam) -> Result<()> {
        Err(anyhow!("connection refused"))
    }

    async fn push_team_result(&self, _result: &TeamRaceResult) -> Result<()> {
        Err(anyhow!("connection refused"))
    }

    async fn push_league_members(&self, _league_id: &str, _members: &[LeagueMember]) -> Result<()> {
        Err(anyhow!("connection refused"))
    }
}

/// A season with the fixture catalog, Paris-Roubaix with imported results,
/// the Tour de France, and three teams:
///
/// - alice: van der Poel (C), Pedersen active; Philipsen, Pidcock bench
/// - bob: van Aert (C), Ganna, Pidcock active; Philipsen bench
/// - carol: Pogacar (C), Vingegaard active; Evenepoel bench
struct World {
    db: Arc<Database>,
    season: SeasonConfig,
}

impl World {
    fn new() -> Self {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let cyclists = import::load_cyclists(&Path::new(FIXTURES).join("cyclists.csv")).unwrap();
        assert_eq!(db.upsert_cyclists(&cyclists).unwrap(), 10);

        db.upsert_race(&race("roubaix", RaceType::OneDay, "2026-04-12", None, 1))
            .unwrap();
        let results =
            import::load_race_results(&Path::new(FIXTURES).join("roubaix_results.csv"), "roubaix")
                .unwrap();
        db.save_race_results("roubaix", &results).unwrap();
        db.upsert_race(&race(
            "tdf",
            RaceType::GrandTour,
            "2026-07-04",
            Some("2026-07-26"),
            21,
        ))
        .unwrap();

        let world = World {
            db,
            season: season(),
        };
        world.build_team("alice", &["vanderpoel", "pedersen", "philipsen", "pidcock"], &["vanderpoel", "pedersen"]);
        world.build_team("bob", &["vanaert", "ganna", "pidcock", "philipsen"], &["vanaert", "ganna", "pidcock"]);
        world.build_team("carol", &["pogacar", "vingegaard", "evenepoel"], &["pogacar", "vingegaard"]);
        world
    }

    fn manager(&self) -> TeamManager<'_> {
        TeamManager::new(&self.db, &self.season)
    }

    /// The first active id is the captain.
    fn build_team(&self, user: &str, roster: &[&str], active: &[&str]) {
        let today = day("2026-03-01");
        let manager = self.manager();
        let team = manager.create_team(user, &format!("Team {user}")).unwrap();
        for id in roster {
            manager.add_cyclist(&team.id, id, today).unwrap();
        }
        let active: Vec<String> = active.iter().map(|s| s.to_string()).collect();
        manager.set_lineup(&team.id, &active, &active[0], today).unwrap();
    }

    fn reconciler(&self, remote: Arc<dyn RemoteSync>) -> TeamReconciler {
        TeamReconciler::new(Arc::clone(&self.db), self.season.clone(), remote)
    }

    fn team(&self, user: &str) -> FantasyTeam {
        self.db.team_for_user(user, 2026).unwrap().unwrap()
    }

    fn points(&self, user: &str) -> u32 {
        self.team(user).total_points
    }
}

fn disabled() -> Arc<dyn RemoteSync> {
    Arc::new(RemoteClient::Disabled)
}

fn processed(outcome: ProcessOutcome) -> ReconcileSummary {
    match outcome {
        ProcessOutcome::Processed(summary) => summary,
        other => panic!("expected a processed outcome, got {other:?}"),
    }
}

fn tdf_stage(cyclist: &str, position: u32, jerseys: Jerseys) -> StageResult {
    StageResult {
        race_id: "tdf".into(),
        stage_number: 1,
        stage_type: StageType::Itt,
        cyclist_id: cyclist.into(),
        position: Some(position),
        status: ResultStatus::Finished,
        jerseys,
    }
}

// ===========================================================================
// One-day races
// ===========================================================================

#[tokio::test]
async fn one_day_race_awards_points_and_ranks_league() {
    let world = World::new();
    let reconciler = world.reconciler(disabled());

    let summary = processed(reconciler.process_race("roubaix", false).await.unwrap());
    assert_eq!(summary.kind, HistoryKind::Race);
    // alice: 105 x2 captain + 50; bob: 40 x2 + 5 + DNF; carol: DNP
    assert_eq!(world.points("alice"), 260);
    assert_eq!(world.points("bob"), 85);
    assert_eq!(world.points("carol"), 0);
    assert_eq!(summary.team_points.len(), 3);

    let race = world.db.get_race("roubaix").unwrap().unwrap();
    assert!(race.is_finished);
    assert!(race.finished_at.is_some());

    let standings = world.db.league_members("global-2026").unwrap();
    let order: Vec<(&str, u32)> = standings
        .iter()
        .map(|m| (m.user_id.as_str(), m.rank))
        .collect();
    assert_eq!(order, vec![("alice", 1), ("bob", 2), ("carol", 3)]);
    assert_eq!(standings[0].points, 260);
}

#[tokio::test]
async fn second_run_is_a_no_op_without_force() {
    let world = World::new();
    let reconciler = world.reconciler(disabled());

    reconciler.process_race("roubaix", false).await.unwrap();
    let outcome = reconciler.process_race("roubaix", false).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::AlreadyProcessed);
    assert_eq!(world.points("alice"), 260);
}

#[tokio::test]
async fn forced_reprocess_matches_a_single_run() {
    let world = World::new();
    let reconciler = world.reconciler(disabled());

    reconciler.process_race("roubaix", false).await.unwrap();
    let once: Vec<(u32, f64)> = ["alice", "bob", "carol"]
        .iter()
        .map(|u| (world.points(u), world.team(u).budget))
        .collect();

    let summary = processed(reconciler.process_race("roubaix", true).await.unwrap());
    assert_eq!(summary.replaced, 3);
    let twice: Vec<(u32, f64)> = ["alice", "bob", "carol"]
        .iter()
        .map(|u| (world.points(u), world.team(u).budget))
        .collect();

    for ((p1, b1), (p2, b2)) in once.iter().zip(&twice) {
        assert_eq!(p1, p2);
        assert!((b1 - b2).abs() < 1e-9);
    }
    assert_eq!(world.db.race_history("roubaix", HistoryKind::Race).unwrap().len(), 3);
}

#[tokio::test]
async fn forced_runs_restore_floored_totals_exactly() {
    let world = World::new();
    let reconciler = world.reconciler(disabled());
    reconciler.process_race("roubaix", false).await.unwrap();

    // bob spent everything the race paid him
    let mut bob = world.team("bob");
    bob.total_points = 0;
    bob.budget = 0.0;
    world.db.save_team(&bob).unwrap();

    for _ in 0..3 {
        reconciler.process_race("roubaix", true).await.unwrap();
    }
    let bob = world.team("bob");
    assert_eq!(bob.total_points, 0);
    assert!(bob.budget.abs() < 1e-9);
    assert_eq!(world.points("alice"), 260);
    assert_eq!(world.db.race_history("roubaix", HistoryKind::Race).unwrap().len(), 3);
}

#[tokio::test]
async fn prize_money_goes_to_top_half() {
    let world = World::new();
    let before: Vec<f64> = ["alice", "bob", "carol"]
        .iter()
        .map(|u| world.team(u).budget)
        .collect();
    let reconciler = world.reconciler(disabled());

    let summary = processed(reconciler.process_race("roubaix", false).await.unwrap());
    // three teams, two paid positions: 2/3 and 1/3 of the 50M pool
    let alice_gain = world.team("alice").budget - before[0];
    let bob_gain = world.team("bob").budget - before[1];
    assert!((alice_gain - 50.0 * 2.0 / 3.0).abs() < 1e-9);
    assert!((bob_gain - 50.0 / 3.0).abs() < 1e-9);
    assert!((world.team("carol").budget - before[2]).abs() < 1e-9);
    assert_eq!(summary.earnings.len(), 2);
}

#[tokio::test]
async fn chips_multiply_and_are_consumed() {
    let world = World::new();
    let alice = world.team("alice");
    let manager = world.manager();
    let before_race = day("2026-04-01");
    manager
        .activate_chip(&alice.id, Chip::TripleCaptain, "roubaix", before_race)
        .unwrap();
    manager
        .activate_chip(&alice.id, Chip::BenchBoost, "roubaix", before_race)
        .unwrap();

    let reconciler = world.reconciler(disabled());
    reconciler.process_race("roubaix", false).await.unwrap();
    // 105 x3 + 50 + Philipsen 70 from the bench + Pidcock DNF
    assert_eq!(world.points("alice"), 435);

    let alice = world.team("alice");
    assert!(alice.triple_captain.used && !alice.triple_captain.is_active());
    assert!(alice.bench_boost.used && !alice.bench_boost.is_active());

    let history = world.db.race_history("roubaix", HistoryKind::Race).unwrap();
    let row = history.iter().find(|h| h.team_id == alice.id).unwrap();
    assert!(row.triple_captain_active && row.bench_boost_active);

    // chips are gone from the team but the redo still honours them
    reconciler.process_race("roubaix", true).await.unwrap();
    assert_eq!(world.points("alice"), 435);
}

#[tokio::test]
async fn breakdown_lists_dnp_and_dnf_without_mutating() {
    let world = World::new();
    let reconciler = world.reconciler(disabled());
    let bob = world.team("bob");
    let carol = world.team("carol");

    let preview = reconciler.team_points_breakdown(&bob.id, "roubaix").unwrap();
    assert_eq!(world.points("bob"), 0);
    let pidcock = preview.iter().find(|b| b.cyclist_id == "pidcock").unwrap();
    assert_eq!((pidcock.points, pidcock.status.as_str()), (0, "DNF"));
    let captain = preview.iter().find(|b| b.is_captain).unwrap();
    assert_eq!((captain.cyclist_name.as_str(), captain.points), ("Wout van Aert", 80));

    reconciler.process_race("roubaix", false).await.unwrap();
    let stored = reconciler.team_points_breakdown(&carol.id, "roubaix").unwrap();
    let statuses: Vec<&str> = stored.iter().map(|b| b.status.as_str()).collect();
    assert_eq!(statuses, vec!["DNP", "DNP"]);
    assert_eq!(
        reconciler.team_points_breakdown(&bob.id, "roubaix").unwrap(),
        preview
    );
}

#[tokio::test]
async fn race_without_results_is_closed() {
    let world = World::new();
    world
        .db
        .upsert_race(&race("strade", RaceType::OneDay, "2026-03-07", None, 1))
        .unwrap();
    let reconciler = world.reconciler(disabled());

    let outcome = reconciler.process_race("strade", false).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::NoResults);
    assert!(world.db.get_race("strade").unwrap().unwrap().is_finished);
    assert!(reconciler.process_race("nowhere", false).await.is_err());
}

// ===========================================================================
// Stages and final GC
// ===========================================================================

#[tokio::test]
async fn stage_points_only_for_gaining_teams() {
    let world = World::new();
    let reconciler = world.reconciler(disabled());
    let leader = Jerseys {
        gc_leader: true,
        ..Jerseys::default()
    };
    let results = vec![
        tdf_stage("pogacar", 1, leader),
        tdf_stage("evenepoel", 2, Jerseys::default()),
        tdf_stage("vingegaard", 3, Jerseys::default()),
    ];

    let summary = processed(reconciler.process_stage("tdf", 1, results, false).await.unwrap());
    // ITT x1.2: (60 + 10) x2 for Pogacar, 42 for Vingegaard; Evenepoel benched
    assert_eq!(world.points("carol"), 182);
    assert_eq!(summary.team_points.len(), 1);
    assert_eq!(summary.kind, HistoryKind::Stage(1));
    assert_eq!(world.db.race_history("tdf", HistoryKind::Stage(1)).unwrap().len(), 1);

    let stage = world.db.get_stage("tdf", 1).unwrap().unwrap();
    assert!(stage.is_processed);
    assert_eq!(stage.stage_type, StageType::Itt);

    // stored results are reused when none are passed
    let outcome = reconciler.process_stage("tdf", 1, vec![], false).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::AlreadyProcessed);
    reconciler.process_stage("tdf", 1, vec![], true).await.unwrap();
    assert_eq!(world.points("carol"), 182);
}

#[tokio::test]
async fn corrected_stage_takes_points_back_everywhere() {
    let world = World::new();
    let remote = Arc::new(RecordingRemote::default());
    let reconciler = world.reconciler(remote.clone());
    let carol_budget = world.team("carol").budget;

    let first = vec![tdf_stage("pogacar", 1, Jerseys::default())];
    reconciler.process_stage("tdf", 1, first, false).await.unwrap();
    assert!(world.points("carol") > 0);

    // the result is corrected: Ganna won, Pogacar was nowhere
    let corrected = vec![tdf_stage("ganna", 1, Jerseys::default())];
    let summary = processed(reconciler.process_stage("tdf", 1, corrected, true).await.unwrap());
    assert_eq!(summary.replaced, 1);
    assert_eq!(world.points("carol"), 0);
    assert_eq!(world.points("bob"), 60);
    assert!((world.team("carol").budget - carol_budget).abs() < 1e-9);

    let standings = world.db.league_members("global-2026").unwrap();
    let carol = standings.iter().find(|m| m.user_id == "carol").unwrap();
    let bob = standings.iter().find(|m| m.user_id == "bob").unwrap();
    assert_eq!(carol.points, 0);
    assert_eq!((bob.points, bob.rank), (60, 1));

    let carol_id = world.team("carol").id;
    let pushes = remote
        .pushed()
        .iter()
        .filter(|p| **p == format!("team:{carol_id}"))
        .count();
    assert_eq!(pushes, 2);

    let history = world.db.race_history("tdf", HistoryKind::Stage(1)).unwrap();
    let bob_id = world.team("bob").id;
    let owners: Vec<&str> = history.iter().map(|h| h.team_id.as_str()).collect();
    assert_eq!(owners, vec![bob_id.as_str()]);
}

#[tokio::test]
async fn stage_without_type_or_results_is_an_error() {
    let world = World::new();
    let reconciler = world.reconciler(disabled());
    assert!(reconciler.process_stage("tdf", 9, vec![], false).await.is_err());
}

#[tokio::test]
async fn final_gc_bonus_closes_race_and_never_double_counts() {
    let world = World::new();
    let reconciler = world.reconciler(disabled());
    let standings: Vec<GcStanding> = [("pogacar", 1), ("vingegaard", 2), ("evenepoel", 3)]
        .into_iter()
        .map(|(id, pos)| GcStanding {
            race_id: "tdf".into(),
            cyclist_id: id.into(),
            gc_position: pos,
        })
        .collect();

    assert!(reconciler.apply_final_gc_bonus("tdf", vec![]).await.is_err());

    reconciler.apply_final_gc_bonus("tdf", standings).await.unwrap();
    // 200 x2 + 150, Evenepoel benched
    assert_eq!(world.points("carol"), 550);
    assert!(world.db.get_race("tdf").unwrap().unwrap().is_finished);

    // reapplying the stored standings replaces the previous bonus
    let summary = processed(reconciler.apply_final_gc_bonus("tdf", vec![]).await.unwrap());
    assert_eq!(summary.replaced, 1);
    assert_eq!(world.points("carol"), 550);
}

#[tokio::test]
async fn corrected_final_gc_replaces_the_bonus() {
    let world = World::new();
    let reconciler = world.reconciler(disabled());
    let gc = |ids: &[&str]| -> Vec<GcStanding> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| GcStanding {
                race_id: "tdf".into(),
                cyclist_id: (*id).into(),
                gc_position: i as u32 + 1,
            })
            .collect()
    };

    reconciler
        .apply_final_gc_bonus("tdf", gc(&["pogacar", "vingegaard"]))
        .await
        .unwrap();
    assert_eq!(world.points("carol"), 550);

    reconciler.apply_final_gc_bonus("tdf", gc(&["ganna"])).await.unwrap();
    assert_eq!(world.points("carol"), 0);
    assert_eq!(world.points("bob"), 200);

    let standings = world.db.league_members("global-2026").unwrap();
    let carol = standings.iter().find(|m| m.user_id == "carol").unwrap();
    assert_eq!(carol.points, 0);
    assert_eq!(standings.iter().find(|m| m.rank == 1).unwrap().user_id, "bob");
}

// ===========================================================================
// Transfers and standings
// ===========================================================================

#[tokio::test]
async fn transfer_penalty_moves_standings() {
    let world = World::new();
    let reconciler = world.reconciler(disabled());
    reconciler.process_race("roubaix", false).await.unwrap();

    let bob = world.team("bob");
    let today = day("2026-04-20");
    let charge = world
        .manager()
        .commit_transfers(
            &bob.id,
            &["ganna".into(), "pidcock".into()],
            &["ciccone".into()],
            today,
        )
        .unwrap();
    // three transfers against two free
    assert_eq!((charge.transfers, charge.penalty), (3, 4));
    assert_eq!(world.points("bob"), 81);

    let standings = world.db.league_members("global-2026").unwrap();
    let bob_row = standings.iter().find(|m| m.user_id == "bob").unwrap();
    assert_eq!(bob_row.points, 81);
    assert_eq!(bob_row.rank, 2);
}

#[tokio::test]
async fn scored_squads_change_only_through_transfers() {
    let world = World::new();
    let reconciler = world.reconciler(disabled());
    reconciler.process_race("roubaix", false).await.unwrap();

    let bob = world.team("bob");
    let manager = world.manager();
    let today = day("2026-04-20");
    let locked = |err: anyhow::Error| {
        matches!(err.downcast_ref::<RosterError>(), Some(RosterError::SquadLocked))
    };
    assert!(locked(manager.remove_cyclist(&bob.id, "pidcock", today).unwrap_err()));
    assert!(locked(manager.add_cyclist(&bob.id, "ciccone", today).unwrap_err()));
    assert_eq!(world.team("bob").transfers_made, 0);

    // selling the captain would leave the lineup without one
    let err = manager
        .commit_transfers(&bob.id, &["vanaert".into()], &["ciccone".into()], today)
        .unwrap_err();
    assert_eq!(err.downcast_ref::<RosterError>(), Some(&RosterError::CaptainCount(0)));
    let bob = world.team("bob");
    assert_eq!((bob.total_points, bob.transfers_made), (85, 0));
    assert!(world
        .db
        .team_cyclists(&bob.id)
        .unwrap()
        .iter()
        .any(|m| m.cyclist_id == "vanaert" && m.is_captain));
}

// ===========================================================================
// Remote sync
// ===========================================================================

#[tokio::test]
async fn remote_receives_teams_history_and_standings() {
    let world = World::new();
    let remote = Arc::new(RecordingRemote::default());
    let reconciler = world.reconciler(remote.clone());

    let summary = processed(reconciler.process_race("roubaix", false).await.unwrap());
    assert_eq!(summary.remote_failures, 0);

    let pushed = remote.pushed();
    assert_eq!(pushed.iter().filter(|p| p.starts_with("team:")).count(), 3);
    assert_eq!(pushed.iter().filter(|p| p.starts_with("history:")).count(), 3);
    assert!(pushed.contains(&"league:global-2026".to_string()));
}

#[tokio::test]
async fn remote_failures_are_counted_not_fatal() {
    let world = World::new();
    let reconciler = world.reconciler(Arc::new(FailingRemote));

    let summary = processed(reconciler.process_race("roubaix", false).await.unwrap());
    // 3 teams + 3 history rows + 1 league
    assert_eq!(summary.remote_failures, 7);
    assert_eq!(world.points("alice"), 260);
    assert!(world.db.get_race("roubaix").unwrap().unwrap().is_finished);
}
