// Awards fantasy points to every team after a race, a stage or the final GC.
//
// Each pass computes every team's delta in memory, net of any earlier pass it
// replaces, commits it to the local database in one transaction, re-ranks the
// affected leagues and then mirrors the changes to the remote store. Remote
// failures are logged and counted, never propagated.

mod race;
mod stage;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::future::join_all;
use tracing::{error, info};

use crate::config::SeasonConfig;
use crate::db::{Database, ScoringBatch};
use crate::league::LeagueRankUpdater;
use crate::model::{Cyclist, FantasyTeam, HistoryKind, LeagueMember, Race, TeamRaceResult};
use crate::remote::RemoteSync;
use crate::scoring::budget::apply_budget_change;

/// What a processing call did.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Already scored and not forced. Nothing changed.
    AlreadyProcessed,
    /// No results were available. The race (or stage) was closed without
    /// awarding points.
    NoResults,
    Processed(ReconcileSummary),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileSummary {
    pub race_id: String,
    pub kind: HistoryKind,
    /// Points awarded per team id, zero-point teams included for races.
    pub team_points: BTreeMap<String, u32>,
    /// Prize money paid per team id.
    pub earnings: BTreeMap<String, f64>,
    /// History rows of an earlier pass that this one replaced.
    pub replaced: usize,
    pub remote_failures: usize,
}

impl ReconcileSummary {
    pub fn total_points(&self) -> u64 {
        self.team_points.values().map(|p| u64::from(*p)).sum()
    }
}

/// Chip effects for one team in one scoring pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct TeamChips {
    triple_captain: bool,
    bench_boost: bool,
}

impl TeamChips {
    /// Chips bound to the race, or recorded on the run being redone.
    fn for_race(team: &FantasyTeam, race_id: &str, previous: Option<&TeamRaceResult>) -> Self {
        TeamChips {
            triple_captain: team.triple_captain.is_active_for(race_id)
                || previous.is_some_and(|h| h.triple_captain_active),
            bench_boost: team.bench_boost.is_active_for(race_id)
                || previous.is_some_and(|h| h.bench_boost_active),
        }
    }
}

/// Scores teams against stored results and keeps standings in step.
pub struct TeamReconciler {
    db: Arc<Database>,
    season: SeasonConfig,
    remote: Arc<dyn RemoteSync>,
}

impl TeamReconciler {
    pub fn new(db: Arc<Database>, season: SeasonConfig, remote: Arc<dyn RemoteSync>) -> Self {
        Self { db, season, remote }
    }

    /// Rows of an earlier pass over the same race and kind, keyed by team id.
    /// A redo settles against them instead of adding on top.
    fn previous_pass(
        &self,
        race_id: &str,
        kind: HistoryKind,
        existing: Vec<TeamRaceResult>,
    ) -> HashMap<String, TeamRaceResult> {
        if !existing.is_empty() {
            info!(
                race = %race_id,
                ?kind,
                rows = existing.len(),
                "redoing a scored pass; earlier points will be replaced"
            );
        }
        existing.into_iter().map(|h| (h.team_id.clone(), h)).collect()
    }

    fn require_race(&self, race_id: &str) -> Result<Race> {
        self.db
            .get_race(race_id)?
            .with_context(|| format!("race {race_id} not found"))
    }

    fn cyclists(&self) -> Result<HashMap<String, Cyclist>> {
        self.db.cyclist_map()
    }

    /// Commit the batch, re-rank leagues and mirror everything remotely.
    async fn commit_and_publish(
        &self,
        batch: ScoringBatch,
        race_id: &str,
        kind: HistoryKind,
        team_points: BTreeMap<String, u32>,
        replaced: usize,
    ) -> Result<ReconcileSummary> {
        self.db.commit_scoring(&batch)?;
        let standings = LeagueRankUpdater::new(&self.db).sync_team_totals(&batch.teams)?;
        let remote_failures = self.sync_remote(&batch.teams, &batch.history, &standings).await;

        let earnings = batch
            .history
            .iter()
            .filter(|h| h.budget_earned > 0.0)
            .map(|h| (h.team_id.clone(), h.budget_earned))
            .collect();

        let summary = ReconcileSummary {
            race_id: race_id.to_string(),
            kind,
            team_points,
            earnings,
            replaced,
            remote_failures,
        };
        info!(
            race = %race_id,
            ?kind,
            teams = summary.team_points.len(),
            points = summary.total_points(),
            remote_failures,
            "scoring pass committed"
        );
        Ok(summary)
    }

    /// Push teams, history rows and standings. Returns the failure count.
    async fn sync_remote(
        &self,
        teams: &[FantasyTeam],
        history: &[TeamRaceResult],
        standings: &[(String, Vec<LeagueMember>)],
    ) -> usize {
        let mut failures = 0;

        let team_pushes = join_all(teams.iter().map(|t| self.remote.push_team(t))).await;
        for (team, outcome) in teams.iter().zip(team_pushes) {
            if let Err(e) = outcome {
                error!(team = %team.id, "remote team sync failed: {e:#}");
                failures += 1;
            }
        }

        let history_pushes = join_all(history.iter().map(|h| self.remote.push_team_result(h))).await;
        for (row, outcome) in history.iter().zip(history_pushes) {
            if let Err(e) = outcome {
                error!(team = %row.team_id, race = %row.race_id, "remote history sync failed: {e:#}");
                failures += 1;
            }
        }

        for (league_id, members) in standings {
            if let Err(e) = self.remote.push_league_members(league_id, members).await {
                error!(league = %league_id, "remote standings sync failed: {e:#}");
                failures += 1;
            }
        }

        failures
    }
}

/// Apply a pass's points and prize money to a team, net of what the pass it
/// replaces paid. The floors apply once, to the final values.
fn settle(team: &mut FantasyTeam, points: u32, earned: f64, previous: Option<&TeamRaceResult>) {
    let (paid_points, paid_money) = previous.map_or((0, 0.0), |h| (h.points_earned, h.budget_earned));
    team.apply_points_delta(i64::from(points) - i64::from(paid_points));
    team.budget = apply_budget_change(team.budget, earned, paid_money);
}

fn cyclist_name(cyclists: &HashMap<String, Cyclist>, cyclist_id: &str) -> String {
    cyclists
        .get(cyclist_id)
        .map(|c| c.full_name.clone())
        .unwrap_or_else(|| cyclist_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChipState;
    use chrono::Utc;

    #[test]
    fn chips_come_from_team_or_previous_run() {
        let mut team = FantasyTeam::new("t1", "u1", "Souplesse", 2026, 100.0, 2);
        assert_eq!(TeamChips::for_race(&team, "r1", None), TeamChips::default());

        team.bench_boost = ChipState {
            used: true,
            active_race: Some("r1".into()),
        };
        let chips = TeamChips::for_race(&team, "r1", None);
        assert!(chips.bench_boost && !chips.triple_captain);
        assert!(!TeamChips::for_race(&team, "r2", None).bench_boost);

        let previous = TeamRaceResult {
            team_id: "t1".into(),
            race_id: "r2".into(),
            race_name: "R2".into(),
            kind: HistoryKind::Race,
            points_earned: 10,
            budget_earned: 0.0,
            processed_at: Utc::now(),
            breakdown: vec![],
            captain_name: None,
            triple_captain_active: true,
            bench_boost_active: false,
            season: 2026,
        };
        assert!(TeamChips::for_race(&team, "r2", Some(&previous)).triple_captain);
    }

    #[test]
    fn settling_a_redo_only_moves_the_difference() {
        let mut team = FantasyTeam::new("t1", "u1", "Souplesse", 2026, 0.0, 2);
        let previous = TeamRaceResult {
            team_id: "t1".into(),
            race_id: "r1".into(),
            race_name: "R1".into(),
            kind: HistoryKind::Race,
            points_earned: 85,
            budget_earned: 16.5,
            processed_at: Utc::now(),
            breakdown: vec![],
            captain_name: None,
            triple_captain_active: false,
            bench_boost_active: false,
            season: 2026,
        };

        // points and money already spent down to zero stay at zero
        settle(&mut team, 85, 16.5, Some(&previous));
        assert_eq!((team.total_points, team.budget), (0, 0.0));

        team.total_points = 100;
        team.budget = 20.0;
        settle(&mut team, 60, 10.0, Some(&previous));
        assert_eq!(team.total_points, 75);
        assert!((team.budget - 13.5).abs() < 1e-9);

        settle(&mut team, 0, 0.0, Some(&previous));
        assert_eq!((team.total_points, team.budget), (0, 0.0));

        settle(&mut team, 12, 3.0, None);
        assert_eq!((team.total_points, team.budget), (12, 3.0));
    }
}
