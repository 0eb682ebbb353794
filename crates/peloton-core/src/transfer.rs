// Transfer sessions, free-transfer allowance and penalties.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::TransferRules;
use crate::model::{FantasyTeam, Transfer};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("cyclist {0} is not in the roster")]
    NotInRoster(String),

    #[error("cyclist {0} is already in the roster")]
    AlreadyInRoster(String),
}

/// Tracks a roster edit against the roster it started from.
///
/// Only the net difference counts: selling a rider and buying them back in
/// the same session costs nothing.
#[derive(Debug, Clone)]
pub struct TransferSession {
    original: BTreeSet<String>,
    current: BTreeSet<String>,
}

impl TransferSession {
    pub fn new(original: impl IntoIterator<Item = String>) -> Self {
        let original: BTreeSet<String> = original.into_iter().collect();
        TransferSession {
            current: original.clone(),
            original,
        }
    }

    pub fn remove(&mut self, cyclist_id: &str) -> Result<(), TransferError> {
        if !self.current.remove(cyclist_id) {
            return Err(TransferError::NotInRoster(cyclist_id.to_string()));
        }
        Ok(())
    }

    pub fn add(&mut self, cyclist_id: &str) -> Result<(), TransferError> {
        if !self.current.insert(cyclist_id.to_string()) {
            return Err(TransferError::AlreadyInRoster(cyclist_id.to_string()));
        }
        Ok(())
    }

    pub fn transfers_in(&self) -> Vec<String> {
        self.current.difference(&self.original).cloned().collect()
    }

    pub fn transfers_out(&self) -> Vec<String> {
        self.original.difference(&self.current).cloned().collect()
    }

    /// |added| + |removed|.
    pub fn transfer_count(&self) -> u32 {
        let changed = self.current.symmetric_difference(&self.original).count();
        u32::try_from(changed).unwrap_or(u32::MAX)
    }

    pub fn current(&self) -> &BTreeSet<String> {
        &self.current
    }
}

/// Free transfers left this gameweek. Unlimited while the wildcard is active.
pub fn remaining_free_transfers(team: &FantasyTeam) -> u32 {
    if team.has_unlimited_transfers() {
        return u32::MAX;
    }
    team.free_transfers.saturating_sub(team.transfers_made)
}

pub fn transfer_penalty(team: &FantasyTeam, transfers: u32, rules: &TransferRules) -> u32 {
    transfers
        .saturating_sub(remaining_free_transfers(team))
        .saturating_mul(rules.penalty_points)
}

/// What committing a session cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferCharge {
    pub transfers: u32,
    pub free: u32,
    pub paid: u32,
    pub penalty: u32,
}

/// Count `transfers` against the team's allowance and deduct the penalty.
///
/// Wildcard transfers do not consume the allowance.
pub fn charge_transfers(team: &mut FantasyTeam, transfers: u32, rules: &TransferRules) -> TransferCharge {
    let remaining = remaining_free_transfers(team);
    let free = transfers.min(remaining);
    let paid = transfers - free;
    let penalty = transfer_penalty(team, transfers, rules);

    if !team.has_unlimited_transfers() {
        team.transfers_made = team.transfers_made.saturating_add(transfers);
    }
    team.apply_points_delta(-i64::from(penalty));

    TransferCharge {
        transfers,
        free,
        paid,
        penalty,
    }
}

/// Pair ins with outs into transfer records and attribute the penalty to the
/// records that went over the free allowance.
pub fn build_records(
    team: &FantasyTeam,
    ins: &[(String, f64)],
    outs: &[(String, f64)],
    charge: &TransferCharge,
    rules: &TransferRules,
    now: DateTime<Utc>,
) -> Vec<Transfer> {
    let pairs = ins.len().max(outs.len());
    let mut free_left = charge.free;
    let mut records = Vec::with_capacity(pairs);

    for i in 0..pairs {
        let cyclist_in = ins.get(i);
        let cyclist_out = outs.get(i);
        let units = u32::from(cyclist_in.is_some()) + u32::from(cyclist_out.is_some());
        let covered = units.min(free_left);
        free_left -= covered;

        records.push(Transfer {
            team_id: team.id.clone(),
            cyclist_in: cyclist_in.map(|(id, _)| id.clone()),
            cyclist_out: cyclist_out.map(|(id, _)| id.clone()),
            price_in: cyclist_in.map_or(0.0, |(_, price)| *price),
            price_out: cyclist_out.map_or(0.0, |(_, price)| *price),
            gameweek: team.gameweek,
            points_cost: (units - covered) * rules.penalty_points,
            timestamp: now,
            season: team.season,
        });
    }
    records
}

/// Roll the team into the next gameweek, banking unused free transfers up to
/// the cap.
pub fn advance_gameweek(team: &mut FantasyTeam, rules: &TransferRules) {
    let unused = team.free_transfers.saturating_sub(team.transfers_made);
    team.free_transfers = unused
        .saturating_add(rules.free_per_gameweek)
        .min(rules.max_accumulated);
    team.transfers_made = 0;
    team.gameweek += 1;
    team.updated_at = Utc::now();
}
