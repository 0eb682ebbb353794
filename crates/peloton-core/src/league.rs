// League standings: member points and rank ordering.

use std::collections::BTreeSet;

use anyhow::Result;
use tracing::debug;

use crate::db::Database;
use crate::model::{FantasyTeam, LeagueMember};

/// Set a member's points and remember their current rank as the previous
/// one. Returns false if the user is not in `members`.
pub fn update_member_points(members: &mut [LeagueMember], user_id: &str, points: u32) -> bool {
    match members.iter_mut().find(|m| m.user_id == user_id) {
        Some(member) => {
            member.points = points;
            member.previous_rank = member.rank;
            true
        }
        None => false,
    }
}

/// Sort by points descending (earlier join, then team id, breaks ties) and
/// assign ranks 1..=N. Previous rank keeps the old rank, or the new one for
/// members that were never ranked.
pub fn recalculate_rankings(members: &mut [LeagueMember]) {
    members.sort_by(|a, b| {
        b.points
            .cmp(&a.points)
            .then_with(|| a.joined_at.cmp(&b.joined_at))
            .then_with(|| a.team_id.cmp(&b.team_id))
    });
    for (idx, member) in members.iter_mut().enumerate() {
        let new_rank = u32::try_from(idx + 1).unwrap_or(u32::MAX);
        member.previous_rank = if member.rank == 0 { new_rank } else { member.rank };
        member.rank = new_rank;
    }
}

/// Pushes team totals into every league their owners belong to and re-ranks
/// those leagues.
pub struct LeagueRankUpdater<'a> {
    db: &'a Database,
}

impl<'a> LeagueRankUpdater<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Returns the re-ranked members of each touched league.
    pub fn sync_team_totals(&self, teams: &[FantasyTeam]) -> Result<Vec<(String, Vec<LeagueMember>)>> {
        let mut league_ids = BTreeSet::new();
        for team in teams {
            league_ids.extend(self.db.leagues_for_user(&team.user_id)?);
        }

        let mut updated = Vec::with_capacity(league_ids.len());
        for league_id in league_ids {
            let mut members = self.db.league_members(&league_id)?;
            for team in teams {
                if update_member_points(&mut members, &team.user_id, team.total_points) {
                    if let Some(member) = members.iter_mut().find(|m| m.user_id == team.user_id) {
                        member.team_name.clone_from(&team.team_name);
                    }
                }
            }
            recalculate_rankings(&mut members);
            self.db.save_league_members(&members)?;
            debug!(league = %league_id, members = members.len(), "league re-ranked");
            updated.push((league_id, members));
        }
        Ok(updated)
    }

    /// Re-rank a single league from its stored points.
    pub fn recalculate(&self, league_id: &str) -> Result<Vec<LeagueMember>> {
        let mut members = self.db.league_members(league_id)?;
        recalculate_rankings(&mut members);
        self.db.save_league_members(&members)?;
        Ok(members)
    }
}
