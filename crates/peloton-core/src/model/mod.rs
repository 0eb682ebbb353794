// Domain types shared by scoring, reconciliation and persistence.

pub mod cyclist;
pub mod league;
pub mod race;
pub mod team;

pub use cyclist::{Cyclist, CyclistCategory};
pub use league::{League, LeagueMember, LeagueType};
pub use race::{
    GcStanding, Jerseys, Race, RaceResult, RaceType, ResultStatus, Stage, StageResult, StageType,
};
pub use team::{
    Chip, ChipState, CyclistBreakdown, FantasyTeam, HistoryKind, TeamCyclist, TeamRaceResult,
    Transfer,
};
