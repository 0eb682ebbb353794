// Leagues and league membership.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeagueType {
    Global,
    Private,
    Regional,
    Monthly,
}

impl LeagueType {
    pub fn from_str_type(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "GLOBAL" => Some(LeagueType::Global),
            "PRIVATE" => Some(LeagueType::Private),
            "REGIONAL" => Some(LeagueType::Regional),
            "MONTHLY" => Some(LeagueType::Monthly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeagueType::Global => "GLOBAL",
            LeagueType::Private => "PRIVATE",
            LeagueType::Regional => "REGIONAL",
            LeagueType::Monthly => "MONTHLY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct League {
    pub id: String,
    pub name: String,
    pub league_type: LeagueType,
    /// Join code for private leagues.
    pub code: Option<String>,
    pub owner_id: Option<String>,
    pub season: i32,
    pub created_at: DateTime<Utc>,
}

impl League {
    pub fn global_id(season: i32) -> String {
        format!("global-{season}")
    }

    pub fn global(season: i32) -> Self {
        League {
            id: Self::global_id(season),
            name: format!("Global {season}"),
            league_type: LeagueType::Global,
            code: None,
            owner_id: None,
            season,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueMember {
    pub league_id: String,
    pub user_id: String,
    pub team_id: String,
    pub team_name: String,
    pub points: u32,
    /// 1-based; 0 until the first ranking pass.
    pub rank: u32,
    pub previous_rank: u32,
    pub joined_at: DateTime<Utc>,
}

impl LeagueMember {
    /// Positive when the member moved up.
    pub fn rank_change(&self) -> i64 {
        i64::from(self.previous_rank) - i64::from(self.rank)
    }
}
