// Whole-race scoring and per-team breakdowns.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use super::{cyclist_name, settle, ProcessOutcome, TeamChips, TeamReconciler};
use crate::chips;
use crate::db::ScoringBatch;
use crate::model::{
    Cyclist, CyclistBreakdown, FantasyTeam, HistoryKind, Race, RaceResult, RaceType, TeamCyclist,
    TeamRaceResult,
};
use crate::scoring::budget::distribute_pool;
use crate::scoring::{race_result_breakdown, CaptainRole};

/// Status shown for a scoring rider with no result row.
const DID_NOT_PARTICIPATE: &str = "DNP";

/// One team's points for a race, before they touch the team row.
#[derive(Debug, Clone, PartialEq)]
struct TeamScore {
    points: u32,
    breakdown: Vec<CyclistBreakdown>,
    captain_name: Option<String>,
}

/// Score one roster against a race's results.
///
/// Active riders score; bench riders only under bench boost. A rider with
/// several result rows sums them all.
fn score_team_race(
    members: &[TeamCyclist],
    results: &HashMap<&str, Vec<&RaceResult>>,
    race_type: RaceType,
    chips: TeamChips,
    cyclists: &HashMap<String, Cyclist>,
) -> TeamScore {
    let mut points = 0u32;
    let mut breakdown = Vec::new();
    let mut captain_name = None;

    for member in members {
        if member.is_captain {
            captain_name = Some(cyclist_name(cyclists, &member.cyclist_id));
        }
        if !member.is_active && !chips.bench_boost {
            continue;
        }

        let role = CaptainRole::for_member(member.is_captain, chips.triple_captain);
        let name = cyclist_name(cyclists, &member.cyclist_id);
        let Some(rows) = results.get(member.cyclist_id.as_str()) else {
            breakdown.push(CyclistBreakdown {
                cyclist_id: member.cyclist_id.clone(),
                cyclist_name: name,
                points: 0,
                is_captain: member.is_captain,
                position: None,
                status: DID_NOT_PARTICIPATE.to_string(),
                lines: Vec::new(),
            });
            continue;
        };

        let lines: Vec<_> = rows
            .iter()
            .flat_map(|r| race_result_breakdown(r, race_type))
            .collect();
        let base: u32 = lines.iter().map(|l| l.points).sum();
        let cyclist_points = base * role.multiplier();
        points += cyclist_points;

        let first = rows.first();
        breakdown.push(CyclistBreakdown {
            cyclist_id: member.cyclist_id.clone(),
            cyclist_name: name,
            points: cyclist_points,
            is_captain: member.is_captain,
            position: first.and_then(|r| r.position),
            status: first
                .map(|r| r.status.code().to_string())
                .unwrap_or_else(|| DID_NOT_PARTICIPATE.to_string()),
            lines,
        });
    }

    TeamScore {
        points,
        breakdown,
        captain_name,
    }
}

fn group_by_cyclist(results: &[RaceResult]) -> HashMap<&str, Vec<&RaceResult>> {
    let mut grouped: HashMap<&str, Vec<&RaceResult>> = HashMap::new();
    for result in results {
        grouped.entry(result.cyclist_id.as_str()).or_default().push(result);
    }
    grouped
}

impl TeamReconciler {
    fn race_pool(&self, race: &Race) -> f64 {
        match race.race_type {
            RaceType::OneDay => self.season.prizes.one_day,
            RaceType::GrandTour | RaceType::StageRace => self.season.prizes.gc_final,
        }
    }

    /// Award every team of the race's season its points for `race_id`.
    ///
    /// A finished race with history is left alone unless `force` is set, in
    /// which case the new pass replaces the previous one.
    pub async fn process_race(&self, race_id: &str, force: bool) -> Result<ProcessOutcome> {
        let race = self.require_race(race_id)?;

        let existing = self.db.race_history(race_id, HistoryKind::Race)?;
        if race.is_finished && !existing.is_empty() && !force {
            info!(race = %race_id, "race already processed, skipping");
            return Ok(ProcessOutcome::AlreadyProcessed);
        }
        let previous = self.previous_pass(race_id, HistoryKind::Race, existing);

        let results = self.db.race_results(race_id)?;
        if results.is_empty() {
            warn!(race = %race_id, "no results stored; closing race without points");
            self.db.mark_race_finished(race_id, Utc::now())?;
            return Ok(ProcessOutcome::NoResults);
        }

        let grouped = group_by_cyclist(&results);
        let cyclists = self.cyclists()?;
        let teams = self.db.teams_for_season(race.season)?;

        let mut scored: Vec<(FantasyTeam, TeamChips, TeamScore)> = Vec::with_capacity(teams.len());
        for team in teams {
            let members = self.db.team_cyclists(&team.id)?;
            let chips = TeamChips::for_race(&team, race_id, previous.get(&team.id));
            let score = score_team_race(&members, &grouped, race.race_type, chips, &cyclists);
            scored.push((team, chips, score));
        }

        let standings: Vec<(String, u32)> = scored
            .iter()
            .map(|(team, _, score)| (team.id.clone(), score.points))
            .collect();
        let earnings = distribute_pool(&standings, self.race_pool(&race));

        let now = Utc::now();
        let mut batch = ScoringBatch {
            replaces: Some((race_id.to_string(), HistoryKind::Race)),
            finished_race: Some((race_id.to_string(), now)),
            ..ScoringBatch::default()
        };
        let mut team_points = BTreeMap::new();

        for (mut team, team_chips, score) in scored {
            let earned = earnings.get(&team.id).copied().unwrap_or(0.0);
            let paid = previous.get(&team.id);
            settle(&mut team, score.points, earned, paid);
            let released = chips::deactivate_for_race(&mut team, race_id);
            if !released.is_empty() {
                info!(team = %team.id, race = %race_id, ?released, "chips consumed");
            }

            team_points.insert(team.id.clone(), score.points);
            batch.history.push(TeamRaceResult {
                team_id: team.id.clone(),
                race_id: race.id.clone(),
                race_name: race.name.clone(),
                kind: HistoryKind::Race,
                points_earned: score.points,
                budget_earned: earned,
                processed_at: now,
                breakdown: score.breakdown,
                captain_name: score.captain_name,
                triple_captain_active: team_chips.triple_captain,
                bench_boost_active: team_chips.bench_boost,
                season: race.season,
            });
            batch.teams.push(team);
        }

        let summary = self
            .commit_and_publish(batch, race_id, HistoryKind::Race, team_points, previous.len())
            .await?;
        Ok(ProcessOutcome::Processed(summary))
    }

    /// Per-cyclist points of one team for a race, without changing anything.
    ///
    /// Returns the stored breakdown once the race has been processed,
    /// otherwise scores the stored results against the current roster.
    pub fn team_points_breakdown(&self, team_id: &str, race_id: &str) -> Result<Vec<CyclistBreakdown>> {
        let history = self.db.race_history(race_id, HistoryKind::Race)?;
        if let Some(row) = history.into_iter().find(|h| h.team_id == team_id) {
            return Ok(row.breakdown);
        }

        let race = self.require_race(race_id)?;
        let team = self
            .db
            .get_team(team_id)?
            .with_context(|| format!("team {team_id} not found"))?;
        let results = self.db.race_results(race_id)?;
        let members = self.db.team_cyclists(team_id)?;
        let chips = TeamChips::for_race(&team, race_id, None);
        let score = score_team_race(
            &members,
            &group_by_cyclist(&results),
            race.race_type,
            chips,
            &self.cyclists()?,
        );
        Ok(score.breakdown)
    }
}
