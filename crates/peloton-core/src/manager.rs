// Team management: creation, roster edits, lineups, chips and transfers.
//
// Every operation loads the current state, runs the pure rule checks and
// writes the result back in one transaction. `today` is passed in so roster
// freezes and chip deadlines can be tested against fixed dates.
//
// Single buys and sales are only free while the first squad is being built.
// After that every change goes through a transfer session and the ledger.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use tracing::{debug, info};

use crate::chips::{self, ChipError};
use crate::config::SeasonConfig;
use crate::db::{Database, TransferBatch};
use crate::league::LeagueRankUpdater;
use crate::model::{Chip, Cyclist, FantasyTeam, LeagueMember, TeamCyclist};
use crate::roster::{self, RosterError, SquadStatus};
use crate::scoring::budget::apply_budget_change;
use crate::transfer::{self, TransferCharge, TransferSession};

pub struct TeamManager<'a> {
    db: &'a Database,
    season: &'a SeasonConfig,
}

impl<'a> TeamManager<'a> {
    pub fn new(db: &'a Database, season: &'a SeasonConfig) -> Self {
        Self { db, season }
    }

    /// Create the user's team for the configured season and enter it in the
    /// global league.
    pub fn create_team(&self, user_id: &str, team_name: &str) -> Result<FantasyTeam> {
        let year = self.season.year;
        if let Some(existing) = self.db.team_for_user(user_id, year)? {
            anyhow::bail!(
                "user {user_id} already has team {} for season {year}",
                existing.id
            );
        }

        let team = FantasyTeam::new(
            format!("{user_id}-{year}"),
            user_id,
            team_name,
            year,
            self.season.team.initial_budget,
            self.season.transfers.free_per_gameweek,
        );
        self.db.save_team(&team)?;

        let league = self.db.ensure_global_league(year)?;
        self.db.join_league(&LeagueMember {
            league_id: league.id.clone(),
            user_id: user_id.to_string(),
            team_id: team.id.clone(),
            team_name: team.team_name.clone(),
            points: 0,
            rank: 0,
            previous_rank: 0,
            joined_at: Utc::now(),
        })?;
        LeagueRankUpdater::new(self.db).recalculate(&league.id)?;

        info!(team = %team.id, user = %user_id, league = %league.id, "team created");
        Ok(team)
    }

    fn load_team(&self, team_id: &str) -> Result<FantasyTeam> {
        self.db
            .get_team(team_id)?
            .with_context(|| format!("team {team_id} not found"))
    }

    fn load_cyclist(&self, cyclist_id: &str) -> Result<Cyclist> {
        Ok(self
            .db
            .get_cyclist(cyclist_id)?
            .ok_or_else(|| RosterError::UnknownCyclist(cyclist_id.to_string()))?)
    }

    /// Rosters cannot change while any race is running.
    fn ensure_not_frozen(&self, today: NaiveDate) -> Result<()> {
        if let Some(race) = self.db.races_running_on(today)?.into_iter().next() {
            return Err(RosterError::Frozen {
                race_name: race.name,
            }
            .into());
        }
        Ok(())
    }

    /// The initial build lasts until the squad is complete, the team has
    /// scored or a transfer session has been committed.
    fn ensure_building(&self, team: &FantasyTeam, squad: &SquadStatus) -> Result<()> {
        let built = squad.is_complete()
            || team.total_points > 0
            || !self.db.team_history(&team.id)?.is_empty()
            || !self.db.transfers_for_team(&team.id)?.is_empty();
        if built {
            return Err(RosterError::SquadLocked.into());
        }
        Ok(())
    }

    /// Roster size and category balance of a team.
    pub fn squad_status(&self, team_id: &str) -> Result<SquadStatus> {
        let members = self.db.team_cyclists(team_id)?;
        let cyclists = self.db.cyclist_map()?;
        Ok(roster::squad_status(&self.season.team, &members, &cyclists))
    }

    /// Buy a cyclist onto the bench at the current price, while building the
    /// first squad.
    pub fn add_cyclist(&self, team_id: &str, cyclist_id: &str, today: NaiveDate) -> Result<FantasyTeam> {
        self.ensure_not_frozen(today)?;
        let mut team = self.load_team(team_id)?;
        let candidate = self.load_cyclist(cyclist_id)?;
        let members = self.db.team_cyclists(team_id)?;
        let cyclists = self.db.cyclist_map()?;
        self.ensure_building(&team, &roster::squad_status(&self.season.team, &members, &cyclists))?;

        let eligibility = roster::can_add_cyclist(&self.season.team, team.budget, &members, &cyclists, &candidate);
        if !eligibility.is_eligible() {
            return Err(RosterError::Ineligible {
                cyclist_id: cyclist_id.to_string(),
                reason: eligibility,
            }
            .into());
        }

        team.budget = apply_budget_change(team.budget, 0.0, candidate.price);
        team.updated_at = Utc::now();
        let member = TeamCyclist {
            team_id: team.id.clone(),
            cyclist_id: candidate.id.clone(),
            is_active: false,
            is_captain: false,
            purchase_price: candidate.price,
        };
        self.db.buy_cyclist(&team, &member)?;
        info!(team = %team.id, cyclist = %candidate.id, price = candidate.price, "cyclist bought");
        Ok(team)
    }

    /// Sell a cyclist back at their current price, while building the first
    /// squad. The captain can only go once another rider holds the armband.
    pub fn remove_cyclist(&self, team_id: &str, cyclist_id: &str, today: NaiveDate) -> Result<FantasyTeam> {
        self.ensure_not_frozen(today)?;
        let mut team = self.load_team(team_id)?;
        let members = self.db.team_cyclists(team_id)?;
        let cyclists = self.db.cyclist_map()?;
        self.ensure_building(&team, &roster::squad_status(&self.season.team, &members, &cyclists))?;
        let member = members
            .iter()
            .find(|m| m.cyclist_id == cyclist_id)
            .ok_or_else(|| RosterError::NotInRoster(cyclist_id.to_string()))?;
        let remaining: Vec<TeamCyclist> = members
            .iter()
            .filter(|m| m.cyclist_id != cyclist_id)
            .cloned()
            .collect();
        roster::validate_lineup(&self.season.team, &remaining)?;

        let refund = self.current_price(member)?;
        team.budget = apply_budget_change(team.budget, refund, 0.0);
        team.updated_at = Utc::now();
        self.db.sell_cyclist(&team, cyclist_id)?;
        info!(team = %team.id, cyclist = %cyclist_id, refund, "cyclist sold");
        Ok(team)
    }

    /// Catalog price, or what the team paid if the rider left the catalog.
    fn current_price(&self, member: &TeamCyclist) -> Result<f64> {
        Ok(self
            .db
            .get_cyclist(&member.cyclist_id)?
            .map_or(member.purchase_price, |c| c.price))
    }

    /// Replace the active lineup and captain.
    pub fn set_lineup(
        &self,
        team_id: &str,
        active_ids: &[String],
        captain_id: &str,
        today: NaiveDate,
    ) -> Result<Vec<TeamCyclist>> {
        self.ensure_not_frozen(today)?;
        let mut members = self.db.team_cyclists(team_id)?;
        roster::apply_lineup(&self.season.team, &mut members, active_ids, captain_id)?;
        roster::validate_lineup(&self.season.team, &members)?;
        self.db.save_lineup(&members)?;
        debug!(team = %team_id, active = active_ids.len(), captain = %captain_id, "lineup saved");
        Ok(members)
    }

    /// Bind a chip to an upcoming race.
    pub fn activate_chip(&self, team_id: &str, chip: Chip, race_id: &str, today: NaiveDate) -> Result<FantasyTeam> {
        let mut team = self.load_team(team_id)?;
        let race = self
            .db
            .get_race(race_id)?
            .with_context(|| format!("race {race_id} not found"))?;
        if race.has_started(today) {
            return Err(ChipError::RaceStarted {
                chip,
                race_name: race.name,
            }
            .into());
        }
        chips::activate(&mut team, chip, race_id)?;
        team.updated_at = Utc::now();
        self.db.save_team(&team)?;
        info!(team = %team.id, %chip, race = %race_id, "chip activated");
        Ok(team)
    }

    /// Cancel a chip before its race starts and get it back.
    pub fn cancel_chip(&self, team_id: &str, chip: Chip, today: NaiveDate) -> Result<FantasyTeam> {
        let mut team = self.load_team(team_id)?;
        let started = match team.chip(chip).active_race.as_deref() {
            Some(race_id) => self
                .db
                .get_race(race_id)?
                .filter(|race| race.has_started(today))
                .map(|race| race.name),
            None => None,
        };
        chips::cancel(&mut team, chip, started.as_deref())?;
        team.updated_at = Utc::now();
        self.db.save_team(&team)?;
        info!(team = %team.id, %chip, "chip cancelled");
        Ok(team)
    }

    /// Apply a set of sales and purchases as one transfer session.
    ///
    /// Sales are refunded before purchases are checked against the budget.
    /// Transfers beyond the free allowance cost points unless the wildcard is
    /// active. A complete squad must stay complete, and the lineup left behind
    /// must still have its captain.
    pub fn commit_transfers(
        &self,
        team_id: &str,
        outs: &[String],
        ins: &[String],
        today: NaiveDate,
    ) -> Result<TransferCharge> {
        self.ensure_not_frozen(today)?;
        let mut team = self.load_team(team_id)?;
        let members = self.db.team_cyclists(team_id)?;

        let cyclists = self.db.cyclist_map()?;
        let was_complete = roster::squad_status(&self.season.team, &members, &cyclists).is_complete();

        let mut session = TransferSession::new(members.iter().map(|m| m.cyclist_id.clone()));
        for id in outs {
            session.remove(id)?;
        }
        for id in ins {
            session.add(id)?;
        }
        let transfers = session.transfer_count();
        if transfers == 0 {
            return Ok(TransferCharge {
                transfers: 0,
                free: 0,
                paid: 0,
                penalty: 0,
            });
        }

        let sold_ids = session.transfers_out();
        let bought_ids = session.transfers_in();

        let mut sold = Vec::with_capacity(sold_ids.len());
        for id in &sold_ids {
            let price = cyclists.get(id).map_or_else(
                || members.iter().find(|m| &m.cyclist_id == id).map_or(0.0, |m| m.purchase_price),
                |c| c.price,
            );
            team.budget = apply_budget_change(team.budget, price, 0.0);
            sold.push((id.clone(), price));
        }

        let mut kept: Vec<TeamCyclist> = members
            .into_iter()
            .filter(|m| !sold_ids.contains(&m.cyclist_id))
            .collect();
        let mut added = Vec::with_capacity(bought_ids.len());
        let mut bought = Vec::with_capacity(bought_ids.len());
        for id in &bought_ids {
            let candidate = lookup(&cyclists, id)?;
            let eligibility =
                roster::can_add_cyclist(&self.season.team, team.budget, &kept, &cyclists, candidate);
            if !eligibility.is_eligible() {
                return Err(RosterError::Ineligible {
                    cyclist_id: id.clone(),
                    reason: eligibility,
                }
                .into());
            }
            team.budget = apply_budget_change(team.budget, 0.0, candidate.price);
            let member = TeamCyclist {
                team_id: team.id.clone(),
                cyclist_id: id.clone(),
                is_active: false,
                is_captain: false,
                purchase_price: candidate.price,
            };
            kept.push(member.clone());
            added.push(member);
            bought.push((id.clone(), candidate.price));
        }

        roster::validate_lineup(&self.season.team, &kept)?;
        let after = roster::squad_status(&self.season.team, &kept, &cyclists);
        if was_complete && !after.is_complete() {
            return Err(RosterError::SquadIncomplete {
                size: after.size,
                required: after.required,
            }
            .into());
        }

        let charge = transfer::charge_transfers(&mut team, transfers, &self.season.transfers);
        let records = transfer::build_records(&team, &bought, &sold, &charge, &self.season.transfers, Utc::now());
        self.db.commit_transfers(&TransferBatch {
            team: &team,
            removed: &sold_ids,
            added: &added,
            records: &records,
        })?;
        if charge.penalty > 0 {
            LeagueRankUpdater::new(self.db).sync_team_totals(std::slice::from_ref(&team))?;
        }

        info!(
            team = %team.id,
            transfers,
            paid = charge.paid,
            penalty = charge.penalty,
            "transfers committed"
        );
        Ok(charge)
    }

    /// Move every team of the season into the next gameweek.
    pub fn advance_gameweek(&self) -> Result<usize> {
        let teams = self.db.teams_for_season(self.season.year)?;
        for mut team in teams.iter().cloned() {
            transfer::advance_gameweek(&mut team, &self.season.transfers);
            self.db.save_team(&team)?;
        }
        info!(season = self.season.year, teams = teams.len(), "gameweek advanced");
        Ok(teams.len())
    }
}

fn lookup<'c>(cyclists: &'c HashMap<String, Cyclist>, id: &str) -> Result<&'c Cyclist, RosterError> {
    cyclists
        .get(id)
        .ok_or_else(|| RosterError::UnknownCyclist(id.to_string()))
}
