// Per-stage scoring and the final GC bonus of multi-stage races.

use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{cyclist_name, settle, ProcessOutcome, TeamChips, TeamReconciler};
use crate::chips;
use crate::db::ScoringBatch;
use crate::model::{
    Cyclist, CyclistBreakdown, FantasyTeam, GcStanding, HistoryKind, Race, Stage, StageResult,
    StageType, TeamCyclist, TeamRaceResult,
};
use crate::scoring::budget::distribute_pool;
use crate::scoring::tables::final_gc_bonus;
use crate::scoring::{stage_result_breakdown, BreakdownLine, CaptainRole};

/// A team's gain from one stage or the final GC.
#[derive(Debug, Clone, PartialEq)]
struct StageScore {
    points: u32,
    breakdown: Vec<CyclistBreakdown>,
    captain_name: Option<String>,
}

fn score_team_stage(
    members: &[TeamCyclist],
    results: &HashMap<&str, &StageResult>,
    stage_type: StageType,
    chips: TeamChips,
    cyclists: &HashMap<String, Cyclist>,
) -> StageScore {
    let mut score = StageScore {
        points: 0,
        breakdown: Vec::new(),
        captain_name: None,
    };

    for member in members {
        if member.is_captain {
            score.captain_name = Some(cyclist_name(cyclists, &member.cyclist_id));
        }
        if !member.is_active && !chips.bench_boost {
            continue;
        }
        let Some(result) = results.get(member.cyclist_id.as_str()) else {
            continue;
        };

        let role = CaptainRole::for_member(member.is_captain, chips.triple_captain);
        let lines = stage_result_breakdown(result, stage_type);
        let points = lines.iter().map(|l| l.points).sum::<u32>() * role.multiplier();
        score.points += points;
        score.breakdown.push(CyclistBreakdown {
            cyclist_id: member.cyclist_id.clone(),
            cyclist_name: cyclist_name(cyclists, &member.cyclist_id),
            points,
            is_captain: member.is_captain,
            position: result.position,
            status: result.status.code().to_string(),
            lines,
        });
    }
    score
}

/// Final GC bonus for the active riders. Bench boost does not extend to it.
fn score_team_final_gc(
    members: &[TeamCyclist],
    gc_positions: &HashMap<&str, u32>,
    chips: TeamChips,
    cyclists: &HashMap<String, Cyclist>,
) -> StageScore {
    let mut score = StageScore {
        points: 0,
        breakdown: Vec::new(),
        captain_name: None,
    };

    for member in members.iter().filter(|m| m.is_active) {
        if member.is_captain {
            score.captain_name = Some(cyclist_name(cyclists, &member.cyclist_id));
        }
        let Some(&gc_position) = gc_positions.get(member.cyclist_id.as_str()) else {
            continue;
        };
        let base = final_gc_bonus(gc_position);
        if base == 0 {
            continue;
        }
        let role = CaptainRole::for_member(member.is_captain, chips.triple_captain);
        let points = base * role.multiplier();
        score.points += points;
        score.breakdown.push(CyclistBreakdown {
            cyclist_id: member.cyclist_id.clone(),
            cyclist_name: cyclist_name(cyclists, &member.cyclist_id),
            points,
            is_captain: member.is_captain,
            position: Some(gc_position),
            status: "FIN".to_string(),
            lines: vec![BreakdownLine {
                label: format!("Final GC {gc_position}"),
                points: base,
            }],
        });
    }
    score
}

impl TeamReconciler {
    /// Stage type from the stored stage, else from the first result.
    fn resolve_stage_type(
        stored: Option<&Stage>,
        results: &[StageResult],
        race_id: &str,
        stage_number: u32,
    ) -> Result<StageType> {
        if let Some(stage) = stored {
            return Ok(stage.stage_type);
        }
        match results.first() {
            Some(first) => Ok(first.stage_type),
            None => bail!("stage type unknown for {race_id} stage {stage_number}"),
        }
    }

    /// Score every team for one stage.
    ///
    /// `results` replace whatever is stored for the stage; pass an empty vec
    /// to score the stored results. Only teams that gained points get a
    /// history row, but every team paid by an earlier pass is settled.
    pub async fn process_stage(
        &self,
        race_id: &str,
        stage_number: u32,
        results: Vec<StageResult>,
        force: bool,
    ) -> Result<ProcessOutcome> {
        let race = self.require_race(race_id)?;
        let stored = self.db.get_stage(race_id, stage_number)?;

        let results = if results.is_empty() {
            self.db.stage_results(race_id, stage_number)?
        } else {
            results
        };
        let stage_type = Self::resolve_stage_type(stored.as_ref(), &results, race_id, stage_number)?;

        if stored.is_none() {
            self.db.upsert_stage(&Stage {
                race_id: race_id.to_string(),
                stage_number,
                stage_type,
                name: format!("{} stage {stage_number}", race.name),
                date: None,
                is_processed: false,
            })?;
        }
        self.db.save_stage_results(race_id, stage_number, &results)?;

        let kind = HistoryKind::Stage(stage_number);
        if stored.as_ref().is_some_and(|s| s.is_processed) && !force {
            info!(race = %race_id, stage = stage_number, "stage already processed, skipping");
            return Ok(ProcessOutcome::AlreadyProcessed);
        }
        if results.is_empty() {
            warn!(race = %race_id, stage = stage_number, "no stage results to score");
            return Ok(ProcessOutcome::NoResults);
        }

        let existing = self.db.race_history(race_id, kind)?;
        let previous = self.previous_pass(race_id, kind, existing);

        let by_cyclist: HashMap<&str, &StageResult> =
            results.iter().map(|r| (r.cyclist_id.as_str(), r)).collect();
        let cyclists = self.cyclists()?;

        let mut scored = Vec::new();
        for team in self.db.teams_for_season(race.season)? {
            let members = self.db.team_cyclists(&team.id)?;
            let chips = TeamChips::for_race(&team, race_id, previous.get(&team.id));
            let score = score_team_stage(&members, &by_cyclist, stage_type, chips, &cyclists);
            scored.push((team, chips, score));
        }

        let mut batch = ScoringBatch {
            replaces: Some((race_id.to_string(), kind)),
            processed_stage: Some((race_id.to_string(), stage_number)),
            ..ScoringBatch::default()
        };
        let team_points = apply_deltas(
            &mut batch,
            scored,
            self.season.prizes.stage,
            &previous,
            &race,
            kind,
            Utc::now(),
        );

        let summary = self
            .commit_and_publish(batch, race_id, kind, team_points, previous.len())
            .await?;
        Ok(ProcessOutcome::Processed(summary))
    }

    /// Award the final GC bonus and close the race.
    ///
    /// Empty `standings` fall back to the stored ones. A previous final-GC
    /// pass is always replaced, so reapplying corrected standings does not
    /// double count.
    pub async fn apply_final_gc_bonus(
        &self,
        race_id: &str,
        standings: Vec<GcStanding>,
    ) -> Result<ProcessOutcome> {
        let race = self.require_race(race_id)?;
        let standings = if standings.is_empty() {
            self.db.gc_standings(race_id)?
        } else {
            self.db.save_gc_standings(race_id, &standings)?;
            standings
        };
        if standings.is_empty() {
            bail!("no final GC standings for {race_id}");
        }

        let existing = self.db.race_history(race_id, HistoryKind::FinalGc)?;
        let previous = self.previous_pass(race_id, HistoryKind::FinalGc, existing);

        let gc_positions: HashMap<&str, u32> = standings
            .iter()
            .map(|s| (s.cyclist_id.as_str(), s.gc_position))
            .collect();
        let cyclists = self.cyclists()?;

        let mut scored = Vec::new();
        for team in self.db.teams_for_season(race.season)? {
            let members = self.db.team_cyclists(&team.id)?;
            let chips = TeamChips::for_race(&team, race_id, previous.get(&team.id));
            let score = score_team_final_gc(&members, &gc_positions, chips, &cyclists);
            scored.push((team, chips, score));
        }

        let now = Utc::now();
        let mut batch = ScoringBatch {
            replaces: Some((race_id.to_string(), HistoryKind::FinalGc)),
            finished_race: Some((race_id.to_string(), now)),
            ..ScoringBatch::default()
        };
        let team_points = apply_deltas(
            &mut batch,
            scored,
            self.season.prizes.gc_final,
            &previous,
            &race,
            HistoryKind::FinalGc,
            now,
        );

        let summary = self
            .commit_and_publish(batch, race_id, HistoryKind::FinalGc, team_points, previous.len())
            .await?;
        Ok(ProcessOutcome::Processed(summary))
    }
}

/// Pay the pool across every team, then settle the teams this pass touches:
/// those that gained points, those an earlier pass paid, and (for the final
/// GC) those whose chips it releases. Only gains get a history row.
fn apply_deltas(
    batch: &mut ScoringBatch,
    scored: Vec<(FantasyTeam, TeamChips, StageScore)>,
    pool: f64,
    previous: &HashMap<String, TeamRaceResult>,
    race: &Race,
    kind: HistoryKind,
    now: DateTime<Utc>,
) -> BTreeMap<String, u32> {
    let standings: Vec<(String, u32)> = scored
        .iter()
        .map(|(team, _, score)| (team.id.clone(), score.points))
        .collect();
    let earnings = distribute_pool(&standings, pool);

    let mut team_points = BTreeMap::new();
    for (mut team, team_chips, score) in scored {
        let released = kind == HistoryKind::FinalGc
            && !chips::deactivate_for_race(&mut team, &race.id).is_empty();
        let paid_before = previous.get(&team.id);
        if score.points == 0 && paid_before.is_none() && !released {
            continue;
        }

        let earned = earnings.get(&team.id).copied().unwrap_or(0.0);
        settle(&mut team, score.points, earned, paid_before);
        if score.points > 0 {
            team_points.insert(team.id.clone(), score.points);
            batch.history.push(TeamRaceResult {
                team_id: team.id.clone(),
                race_id: race.id.clone(),
                race_name: race.name.clone(),
                kind,
                points_earned: score.points,
                budget_earned: earned,
                processed_at: now,
                breakdown: score.breakdown,
                captain_name: score.captain_name,
                triple_captain_active: team_chips.triple_captain,
                bench_boost_active: team_chips.bench_boost,
                season: race.season,
            });
        }
        batch.teams.push(team);
    }
    team_points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Jerseys, ResultStatus};

    fn member(id: &str, active: bool, captain: bool) -> TeamCyclist {
        TeamCyclist {
            team_id: "t1".into(),
            cyclist_id: id.into(),
            is_active: active,
            is_captain: captain,
            purchase_price: 8.0,
        }
    }

    fn stage_result(cyclist: &str, position: u32) -> StageResult {
        StageResult {
            race_id: "tdf".into(),
            stage_number: 14,
            stage_type: StageType::Mountain,
            cyclist_id: cyclist.into(),
            position: Some(position),
            status: ResultStatus::Finished,
            jerseys: Jerseys::default(),
        }
    }

    #[test]
    fn stage_points_use_type_multiplier_and_captaincy() {
        let members = vec![member("vin", true, true), member("pog", true, false)];
        let results = [stage_result("vin", 1), stage_result("pog", 2)];
        let by_cyclist: HashMap<&str, &StageResult> =
            results.iter().map(|r| (r.cyclist_id.as_str(), r)).collect();
        let score = score_team_stage(
            &members,
            &by_cyclist,
            StageType::Mountain,
            TeamChips::default(),
            &HashMap::new(),
        );
        // 50 * 1.2 = 60 doubled, 40 * 1.2 = 48
        assert_eq!(score.points, 120 + 48);
        assert_eq!(score.breakdown[0].cyclist_name, "vin");
    }

    #[test]
    fn final_gc_ignores_bench_even_with_bench_boost() {
        let members = vec![member("vin", true, true), member("pog", false, false)];
        let gc: HashMap<&str, u32> = [("vin", 2), ("pog", 1)].into_iter().collect();
        let chips = TeamChips {
            triple_captain: true,
            bench_boost: true,
        };
        let score = score_team_final_gc(&members, &gc, chips, &HashMap::new());
        assert_eq!(score.points, 150 * 3);
        assert_eq!(score.breakdown.len(), 1);
    }

    #[test]
    fn stage_type_prefers_stored_stage() {
        let stored = Stage {
            race_id: "tdf".into(),
            stage_number: 1,
            stage_type: StageType::Itt,
            name: "Lille ITT".into(),
            date: None,
            is_processed: false,
        };
        let results = [stage_result("vin", 1)];
        assert_eq!(
            TeamReconciler::resolve_stage_type(Some(&stored), &results, "tdf", 1).unwrap(),
            StageType::Itt
        );
        assert_eq!(
            TeamReconciler::resolve_stage_type(None, &results, "tdf", 1).unwrap(),
            StageType::Mountain
        );
        assert!(TeamReconciler::resolve_stage_type(None, &[], "tdf", 1).is_err());
    }

    fn team(id: &str, total_points: u32, budget: f64) -> FantasyTeam {
        let mut team = FantasyTeam::new(id, format!("u-{id}"), id, 2026, budget, 2);
        team.total_points = total_points;
        team
    }

    fn score(points: u32) -> StageScore {
        StageScore {
            points,
            breakdown: vec![],
            captain_name: None,
        }
    }

    fn race() -> Race {
        Race {
            id: "tdf".into(),
            name: "Tour".into(),
            race_type: crate::model::RaceType::GrandTour,
            start_date: chrono::NaiveDate::from_ymd_opt(2026, 7, 4).unwrap(),
            end_date: chrono::NaiveDate::from_ymd_opt(2026, 7, 26),
            stages: 21,
            country: "FRA".into(),
            season: 2026,
            is_finished: false,
            finished_at: None,
        }
    }

    #[test]
    fn gains_get_history_and_all_teams_count_for_prizes() {
        let scored = vec![
            (team("a", 0, 50.0), TeamChips::default(), score(30)),
            (team("b", 0, 50.0), TeamChips::default(), score(0)),
            (team("c", 0, 50.0), TeamChips::default(), score(0)),
            (team("d", 0, 50.0), TeamChips::default(), score(0)),
        ];
        let mut batch = ScoringBatch::default();
        let points = apply_deltas(
            &mut batch,
            scored,
            20.0,
            &HashMap::new(),
            &race(),
            HistoryKind::Stage(3),
            Utc::now(),
        );
        assert_eq!(points.len(), 1);
        assert_eq!(batch.teams.len(), 1);
        assert_eq!(batch.history.len(), 1);
        // four participants: two paid positions, first takes 2/3
        assert!((batch.history[0].budget_earned - 20.0 * 2.0 / 3.0).abs() < 1e-9);
        assert!((batch.teams[0].budget - (50.0 + 20.0 * 2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn team_paid_before_is_settled_even_without_a_new_gain() {
        let paid = TeamRaceResult {
            team_id: "b".into(),
            race_id: "tdf".into(),
            race_name: "Tour".into(),
            kind: HistoryKind::Stage(3),
            points_earned: 120,
            budget_earned: 10.0,
            processed_at: Utc::now(),
            breakdown: vec![],
            captain_name: None,
            triple_captain_active: false,
            bench_boost_active: false,
            season: 2026,
        };
        let previous: HashMap<String, TeamRaceResult> = [("b".to_string(), paid)].into_iter().collect();
        let scored = vec![
            (team("a", 0, 50.0), TeamChips::default(), score(30)),
            (team("b", 120, 60.0), TeamChips::default(), score(0)),
        ];
        let mut batch = ScoringBatch::default();
        apply_deltas(
            &mut batch,
            scored,
            20.0,
            &previous,
            &race(),
            HistoryKind::Stage(3),
            Utc::now(),
        );

        let b = batch.teams.iter().find(|t| t.id == "b").unwrap();
        assert_eq!(b.total_points, 0);
        assert!((b.budget - 50.0).abs() < 1e-9);
        assert!(batch.history.iter().all(|h| h.team_id == "a"));
    }
}
