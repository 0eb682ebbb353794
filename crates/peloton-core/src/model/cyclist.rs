// Cyclists and rider categories.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rider speciality. Every full roster carries a fixed quota per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CyclistCategory {
    Gc,
    Climber,
    Sprinter,
    TimeTrial,
    Puncher,
    OneDay,
}

impl CyclistCategory {
    pub const ALL: [CyclistCategory; 6] = [
        CyclistCategory::Gc,
        CyclistCategory::Climber,
        CyclistCategory::Sprinter,
        CyclistCategory::TimeTrial,
        CyclistCategory::Puncher,
        CyclistCategory::OneDay,
    ];

    /// Parse a category label.
    ///
    /// Accepts the short codes used by the import files ("GC", "CLIMBER",
    /// "SPRINT", "TT", "HILLS", "ONEDAY") as well as the long forms.
    pub fn from_str_cat(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "GC" => Some(CyclistCategory::Gc),
            "CLIMBER" | "CLIMB" => Some(CyclistCategory::Climber),
            "SPRINTER" | "SPRINT" => Some(CyclistCategory::Sprinter),
            "TT" | "TIMETRIAL" | "TIME_TRIAL" => Some(CyclistCategory::TimeTrial),
            "PUNCHER" | "HILLS" => Some(CyclistCategory::Puncher),
            "ONEDAY" | "ONE_DAY" | "CLASSICS" => Some(CyclistCategory::OneDay),
            _ => None,
        }
    }

    /// Short code, as stored in the database.
    pub fn display_str(&self) -> &'static str {
        match self {
            CyclistCategory::Gc => "GC",
            CyclistCategory::Climber => "CLIMBER",
            CyclistCategory::Sprinter => "SPRINT",
            CyclistCategory::TimeTrial => "TT",
            CyclistCategory::Puncher => "HILLS",
            CyclistCategory::OneDay => "ONEDAY",
        }
    }
}

impl fmt::Display for CyclistCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_str())
    }
}

/// A real-world rider that can be bought into a fantasy roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cyclist {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    /// Professional team the rider races for.
    pub pro_team_id: String,
    pub pro_team_name: String,
    pub nationality: String,
    pub category: CyclistCategory,
    /// Market price in millions.
    pub price: f64,
    /// Injured, abandoned or otherwise unavailable for purchase.
    #[serde(default)]
    pub disabled: bool,
}

impl Cyclist {
    pub fn is_available(&self) -> bool {
        !self.disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_long_codes() {
        assert_eq!(CyclistCategory::from_str_cat("gc"), Some(CyclistCategory::Gc));
        assert_eq!(CyclistCategory::from_str_cat("SPRINT"), Some(CyclistCategory::Sprinter));
        assert_eq!(CyclistCategory::from_str_cat(" hills "), Some(CyclistCategory::Puncher));
        assert_eq!(CyclistCategory::from_str_cat("Puncher"), Some(CyclistCategory::Puncher));
        assert_eq!(CyclistCategory::from_str_cat("one_day"), Some(CyclistCategory::OneDay));
        assert_eq!(CyclistCategory::from_str_cat("rouleur"), None);
    }

    #[test]
    fn display_codes_parse_back() {
        for cat in CyclistCategory::ALL {
            assert_eq!(CyclistCategory::from_str_cat(cat.display_str()), Some(cat));
        }
    }
}
