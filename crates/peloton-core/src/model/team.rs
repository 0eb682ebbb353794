// Fantasy teams, their rosters, race history and transfer records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::scoring::BreakdownLine;

/// One-shot seasonal modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chip {
    /// Unlimited free transfers for the bound race.
    Wildcard,
    /// Captain scores x3 instead of x2.
    TripleCaptain,
    /// Bench riders score as if active.
    BenchBoost,
}

impl Chip {
    pub const ALL: [Chip; 3] = [Chip::Wildcard, Chip::TripleCaptain, Chip::BenchBoost];

    pub fn from_str_chip(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "wildcard" => Some(Chip::Wildcard),
            "triplecaptain" | "tc" => Some(Chip::TripleCaptain),
            "benchboost" | "bb" => Some(Chip::BenchBoost),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Chip::Wildcard => "wildcard",
            Chip::TripleCaptain => "triple-captain",
            Chip::BenchBoost => "bench-boost",
        }
    }
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-season state of a single chip.
///
/// `used` stays set after the race is processed; `active_race` is cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipState {
    pub used: bool,
    pub active_race: Option<String>,
}

impl ChipState {
    pub fn is_active(&self) -> bool {
        self.active_race.is_some()
    }

    pub fn is_active_for(&self, race_id: &str) -> bool {
        self.active_race.as_deref() == Some(race_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FantasyTeam {
    pub id: String,
    pub user_id: String,
    pub team_name: String,
    pub season: i32,
    /// In-game money, millions.
    pub budget: f64,
    pub total_points: u32,
    pub free_transfers: u32,
    pub transfers_made: u32,
    pub gameweek: u32,
    pub wildcard: ChipState,
    pub triple_captain: ChipState,
    pub bench_boost: ChipState,
    pub is_bot: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FantasyTeam {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        team_name: impl Into<String>,
        season: i32,
        budget: f64,
        free_transfers: u32,
    ) -> Self {
        let now = Utc::now();
        FantasyTeam {
            id: id.into(),
            user_id: user_id.into(),
            team_name: team_name.into(),
            season,
            budget,
            total_points: 0,
            free_transfers,
            transfers_made: 0,
            gameweek: 1,
            wildcard: ChipState::default(),
            triple_captain: ChipState::default(),
            bench_boost: ChipState::default(),
            is_bot: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn chip(&self, chip: Chip) -> &ChipState {
        match chip {
            Chip::Wildcard => &self.wildcard,
            Chip::TripleCaptain => &self.triple_captain,
            Chip::BenchBoost => &self.bench_boost,
        }
    }

    pub fn chip_mut(&mut self, chip: Chip) -> &mut ChipState {
        match chip {
            Chip::Wildcard => &mut self.wildcard,
            Chip::TripleCaptain => &mut self.triple_captain,
            Chip::BenchBoost => &mut self.bench_boost,
        }
    }

    pub fn has_unlimited_transfers(&self) -> bool {
        self.wildcard.is_active()
    }

    /// Add a (possibly negative) delta, flooring the total at zero.
    pub fn apply_points_delta(&mut self, delta: i64) {
        let next = i64::from(self.total_points).saturating_add(delta).max(0);
        self.total_points = u32::try_from(next).unwrap_or(u32::MAX);
        self.updated_at = Utc::now();
    }
}

/// Roster membership of one cyclist in one team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamCyclist {
    pub team_id: String,
    pub cyclist_id: String,
    pub is_active: bool,
    pub is_captain: bool,
    pub purchase_price: f64,
}

/// What a history row covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryKind {
    Race,
    Stage(u32),
    FinalGc,
}

impl HistoryKind {
    pub fn stage_number(&self) -> Option<u32> {
        match self {
            HistoryKind::Stage(n) => Some(*n),
            _ => None,
        }
    }
}

/// One line of a team's per-cyclist breakdown for a race or stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclistBreakdown {
    pub cyclist_id: String,
    pub cyclist_name: String,
    pub points: u32,
    pub is_captain: bool,
    pub position: Option<u32>,
    /// Result status code, or "DNP" when the rider had no result.
    pub status: String,
    #[serde(default)]
    pub lines: Vec<BreakdownLine>,
}

/// Points a team earned from one race, stage or final GC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRaceResult {
    pub team_id: String,
    pub race_id: String,
    pub race_name: String,
    pub kind: HistoryKind,
    pub points_earned: u32,
    /// Prize money paid out with these points, millions.
    pub budget_earned: f64,
    pub processed_at: DateTime<Utc>,
    pub breakdown: Vec<CyclistBreakdown>,
    pub captain_name: Option<String>,
    pub triple_captain_active: bool,
    pub bench_boost_active: bool,
    pub season: i32,
}

/// A committed swap. Either side may be empty when ins and outs are unbalanced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub team_id: String,
    pub cyclist_in: Option<String>,
    pub cyclist_out: Option<String>,
    pub price_in: f64,
    pub price_out: f64,
    pub gameweek: u32,
    pub points_cost: u32,
    pub timestamp: DateTime<Utc>,
    pub season: i32,
}
