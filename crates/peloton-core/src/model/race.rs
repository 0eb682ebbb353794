// Races, stages and the result rows reported for them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RaceType {
    OneDay,
    GrandTour,
    StageRace,
}

impl RaceType {
    pub fn from_str_type(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().replace(['-', ' '], "_").as_str() {
            "ONE_DAY" | "ONEDAY" | "CLASSIC" => Some(RaceType::OneDay),
            "GRAND_TOUR" | "GRANDTOUR" => Some(RaceType::GrandTour),
            "STAGE_RACE" | "STAGERACE" => Some(RaceType::StageRace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RaceType::OneDay => "ONE_DAY",
            RaceType::GrandTour => "GRAND_TOUR",
            RaceType::StageRace => "STAGE_RACE",
        }
    }

    pub fn is_multi_stage(&self) -> bool {
        !matches!(self, RaceType::OneDay)
    }
}

impl fmt::Display for RaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Race {
    pub id: String,
    pub name: String,
    pub race_type: RaceType,
    pub start_date: NaiveDate,
    /// `None` for one-day races.
    pub end_date: Option<NaiveDate>,
    pub stages: u32,
    pub country: String,
    pub season: i32,
    pub is_finished: bool,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Race {
    pub fn last_day(&self) -> NaiveDate {
        self.end_date.unwrap_or(self.start_date)
    }

    /// True while the race is on the road on `day`. Roster edits are frozen then.
    pub fn is_running_on(&self, day: NaiveDate) -> bool {
        self.start_date <= day && day <= self.last_day()
    }

    pub fn has_started(&self, day: NaiveDate) -> bool {
        self.start_date <= day
    }
}

/// Stage profile. Determines the multiplier applied to the per-stage table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageType {
    Prologue,
    Flat,
    Hilly,
    Mountain,
    Itt,
    Ttt,
}

impl StageType {
    pub fn from_str_type(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PROLOGUE" => Some(StageType::Prologue),
            "FLAT" => Some(StageType::Flat),
            "HILLY" => Some(StageType::Hilly),
            "MOUNTAIN" => Some(StageType::Mountain),
            "ITT" => Some(StageType::Itt),
            "TTT" => Some(StageType::Ttt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageType::Prologue => "PROLOGUE",
            StageType::Flat => "FLAT",
            StageType::Hilly => "HILLY",
            StageType::Mountain => "MOUNTAIN",
            StageType::Itt => "ITT",
            StageType::Ttt => "TTT",
        }
    }

    /// Stage multiplier expressed in tenths (Mountain = 12 means x1.2).
    pub fn multiplier_tenths(&self) -> u32 {
        match self {
            StageType::Prologue => 5,
            StageType::Flat | StageType::Hilly | StageType::Ttt => 10,
            StageType::Mountain | StageType::Itt => 12,
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub race_id: String,
    pub stage_number: u32,
    pub stage_type: StageType,
    pub name: String,
    pub date: Option<NaiveDate>,
    pub is_processed: bool,
}

/// Outcome status of a rider in a race or stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultStatus {
    Finished,
    Dnf,
    Dns,
    Dsq,
    /// Outside time limit. Only reported for stages.
    Otl,
}

impl ResultStatus {
    /// Parse a status code. An empty code means the rider finished.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "" | "FIN" | "FINISHED" => Some(ResultStatus::Finished),
            "DNF" => Some(ResultStatus::Dnf),
            "DNS" => Some(ResultStatus::Dns),
            "DSQ" | "DQ" => Some(ResultStatus::Dsq),
            "OTL" => Some(ResultStatus::Otl),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ResultStatus::Finished => "FIN",
            ResultStatus::Dnf => "DNF",
            ResultStatus::Dns => "DNS",
            ResultStatus::Dsq => "DSQ",
            ResultStatus::Otl => "OTL",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, ResultStatus::Finished)
    }
}

/// Leader's jerseys held by a rider at the end of a race or stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jerseys {
    pub gc_leader: bool,
    pub mountains_leader: bool,
    pub points_leader: bool,
    pub young_leader: bool,
}

impl Jerseys {
    pub fn any(&self) -> bool {
        self.gc_leader || self.mountains_leader || self.points_leader || self.young_leader
    }
}

/// Whole-race result row. One-day races carry exactly one per rider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceResult {
    pub race_id: String,
    pub cyclist_id: String,
    pub stage_number: Option<u32>,
    pub position: Option<u32>,
    pub status: ResultStatus,
    pub jerseys: Jerseys,
    /// Flat extra points (breakaway, combativity, ...).
    pub bonus_points: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub race_id: String,
    pub stage_number: u32,
    pub stage_type: StageType,
    pub cyclist_id: String,
    pub position: Option<u32>,
    pub status: ResultStatus,
    pub jerseys: Jerseys,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcStanding {
    pub race_id: String,
    pub cyclist_id: String,
    pub gc_position: u32,
}
