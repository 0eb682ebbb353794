// Result rows to fantasy points.

use serde::{Deserialize, Serialize};

use super::tables::{
    final_gc_bonus, race_position_points, stage_points, CAPTAIN_MULTIPLIER, JERSEY_GC_LEADER,
    JERSEY_MOUNTAINS_LEADER, JERSEY_POINTS_LEADER, JERSEY_YOUNG_LEADER,
    TRIPLE_CAPTAIN_MULTIPLIER,
};
use crate::model::{Jerseys, RaceResult, RaceType, StageResult, StageType};

/// Captaincy of a roster member for one scoring event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptainRole {
    None,
    Captain,
    TripleCaptain,
}

impl CaptainRole {
    /// Triple captain only applies to the team's captain.
    pub fn for_member(is_captain: bool, triple_captain_active: bool) -> Self {
        match (is_captain, triple_captain_active) {
            (false, _) => CaptainRole::None,
            (true, false) => CaptainRole::Captain,
            (true, true) => CaptainRole::TripleCaptain,
        }
    }

    pub fn multiplier(&self) -> u32 {
        match self {
            CaptainRole::None => 1,
            CaptainRole::Captain => CAPTAIN_MULTIPLIER,
            CaptainRole::TripleCaptain => TRIPLE_CAPTAIN_MULTIPLIER,
        }
    }
}

/// A labelled component of a result's points, before captaincy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownLine {
    pub label: String,
    pub points: u32,
}

impl BreakdownLine {
    fn new(label: impl Into<String>, points: u32) -> Self {
        BreakdownLine {
            label: label.into(),
            points,
        }
    }
}

// ---------------------------------------------------------------------------
// Races
// ---------------------------------------------------------------------------

/// Points for a whole-race result before captaincy.
///
/// Non-finishers score nothing, jerseys and bonus included.
pub fn race_result_base_points(result: &RaceResult, race_type: RaceType) -> u32 {
    race_result_breakdown(result, race_type)
        .iter()
        .map(|line| line.points)
        .sum()
}

pub fn race_result_points(result: &RaceResult, race_type: RaceType, role: CaptainRole) -> u32 {
    race_result_base_points(result, race_type) * role.multiplier()
}

pub fn race_result_breakdown(result: &RaceResult, race_type: RaceType) -> Vec<BreakdownLine> {
    if !result.status.is_finished() {
        return Vec::new();
    }

    let mut lines = Vec::new();
    if let Some(position) = result.position {
        let points = race_position_points(position, race_type);
        if points > 0 {
            lines.push(BreakdownLine::new(format!("Position {position}"), points));
        }
    }
    lines.extend(jersey_lines(&result.jerseys));
    if result.bonus_points > 0 {
        lines.push(BreakdownLine::new("Bonus", result.bonus_points));
    }
    lines
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Stage table times stage multiplier, plus jerseys. Non-finishers (OTL
/// included) score nothing.
pub fn stage_result_base_points(result: &StageResult, stage_type: StageType) -> u32 {
    stage_result_breakdown(result, stage_type)
        .iter()
        .map(|line| line.points)
        .sum()
}

pub fn stage_result_points(result: &StageResult, stage_type: StageType, role: CaptainRole) -> u32 {
    stage_result_base_points(result, stage_type) * role.multiplier()
}

pub fn stage_result_breakdown(result: &StageResult, stage_type: StageType) -> Vec<BreakdownLine> {
    if !result.status.is_finished() {
        return Vec::new();
    }

    let mut lines = Vec::new();
    if let Some(position) = result.position {
        let points = stage_points(position, stage_type);
        if points > 0 {
            lines.push(BreakdownLine::new(
                format!("Stage {position} ({stage_type})"),
                points,
            ));
        }
    }
    lines.extend(jersey_lines(&result.jerseys));
    lines
}

pub fn final_gc_bonus_points(gc_position: u32, role: CaptainRole) -> u32 {
    final_gc_bonus(gc_position) * role.multiplier()
}

fn jersey_lines(jerseys: &Jerseys) -> Vec<BreakdownLine> {
    [
        (jerseys.gc_leader, "GC leader", JERSEY_GC_LEADER),
        (jerseys.mountains_leader, "Mountains leader", JERSEY_MOUNTAINS_LEADER),
        (jerseys.points_leader, "Points leader", JERSEY_POINTS_LEADER),
        (jerseys.young_leader, "Young rider leader", JERSEY_YOUNG_LEADER),
    ]
    .into_iter()
    .filter(|(held, _, _)| *held)
    .map(|(_, label, points)| BreakdownLine::new(label, points))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResultStatus;

    fn race_result(position: Option<u32>, status: ResultStatus) -> RaceResult {
        RaceResult {
            race_id: "r".into(),
            cyclist_id: "c".into(),
            stage_number: None,
            position,
            status,
            jerseys: Jerseys::default(),
            bonus_points: 0,
        }
    }

    fn stage_result(position: Option<u32>, status: ResultStatus) -> StageResult {
        StageResult {
            race_id: "r".into(),
            stage_number: 3,
            stage_type: StageType::Mountain,
            cyclist_id: "c".into(),
            position,
            status,
            jerseys: Jerseys::default(),
        }
    }

    #[test]
    fn one_day_winner_scores_hundred() {
        let r = race_result(Some(1), ResultStatus::Finished);
        assert_eq!(race_result_points(&r, RaceType::OneDay, CaptainRole::None), 100);
        assert_eq!(race_result_points(&r, RaceType::GrandTour, CaptainRole::None), 50);
    }

    #[test]
    fn captain_doubles_and_triple_captain_triples() {
        let mut r = race_result(Some(3), ResultStatus::Finished);
        r.jerseys.points_leader = true;
        r.bonus_points = 4;
        let base = race_result_base_points(&r, RaceType::OneDay);
        assert_eq!(base, 59);
        assert_eq!(race_result_points(&r, RaceType::OneDay, CaptainRole::Captain), base * 2);
        assert_eq!(race_result_points(&r, RaceType::OneDay, CaptainRole::TripleCaptain), base * 3);
    }

    #[test]
    fn non_finishers_score_zero_including_jerseys_and_bonus() {
        for status in [ResultStatus::Dnf, ResultStatus::Dns, ResultStatus::Dsq] {
            let mut r = race_result(Some(1), status);
            r.jerseys.gc_leader = true;
            r.bonus_points = 10;
            assert_eq!(race_result_points(&r, RaceType::OneDay, CaptainRole::TripleCaptain), 0);
        }
    }

    #[test]
    fn jerseys_add_independently_of_position() {
        let mut r = race_result(None, ResultStatus::Finished);
        r.jerseys = Jerseys {
            gc_leader: true,
            mountains_leader: true,
            points_leader: true,
            young_leader: true,
        };
        assert_eq!(race_result_base_points(&r, RaceType::StageRace), 23);
    }

    #[test]
    fn stage_points_apply_multiplier_before_jerseys() {
        let mut s = stage_result(Some(10), ResultStatus::Finished);
        s.jerseys.mountains_leader = true;
        // 14 * 1.2 = 16, plus 5
        assert_eq!(stage_result_base_points(&s, StageType::Mountain), 21);
        assert_eq!(stage_result_points(&s, StageType::Mountain, CaptainRole::Captain), 42);
    }

    #[test]
    fn outside_time_limit_scores_zero() {
        let mut s = stage_result(Some(1), ResultStatus::Otl);
        s.jerseys.young_leader = true;
        assert_eq!(stage_result_points(&s, StageType::Flat, CaptainRole::Captain), 0);
    }

    #[test]
    fn breakdown_lines_sum_to_base() {
        let mut r = race_result(Some(12), ResultStatus::Finished);
        r.jerseys.mountains_leader = true;
        r.bonus_points = 3;
        let lines = race_result_breakdown(&r, RaceType::OneDay);
        let labels: Vec<&str> = lines.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(labels, vec!["Position 12", "Mountains leader", "Bonus"]);
        assert_eq!(lines.iter().map(|l| l.points).sum::<u32>(), 13);
    }

    #[test]
    fn final_gc_bonus_uses_captain_role() {
        assert_eq!(final_gc_bonus_points(1, CaptainRole::None), 200);
        assert_eq!(final_gc_bonus_points(2, CaptainRole::Captain), 300);
        assert_eq!(final_gc_bonus_points(10, CaptainRole::TripleCaptain), 75);
        assert_eq!(final_gc_bonus_points(11, CaptainRole::Captain), 0);
    }

    #[test]
    fn triple_captain_ignored_for_non_captain() {
        assert_eq!(CaptainRole::for_member(false, true), CaptainRole::None);
        assert_eq!(CaptainRole::for_member(true, true), CaptainRole::TripleCaptain);
        assert_eq!(CaptainRole::for_member(true, false), CaptainRole::Captain);
    }
}
