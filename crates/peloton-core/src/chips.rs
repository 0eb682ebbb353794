// Chip activation, cancellation and post-race deactivation.

use thiserror::Error;

use crate::model::{Chip, FantasyTeam};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChipError {
    #[error("{0} has already been used this season")]
    AlreadyUsed(Chip),

    #[error("{0} is not active")]
    NotActive(Chip),

    #[error("{chip} cannot be changed: {race_name} has already started")]
    RaceStarted { chip: Chip, race_name: String },
}

/// Bind `chip` to `race_id`, spending it for the season.
pub fn activate(team: &mut FantasyTeam, chip: Chip, race_id: &str) -> Result<(), ChipError> {
    let state = team.chip_mut(chip);
    if state.used {
        return Err(ChipError::AlreadyUsed(chip));
    }
    state.used = true;
    state.active_race = Some(race_id.to_string());
    Ok(())
}

/// Cancel an active chip and give it back.
///
/// `started_race` is the name of the bound race if it is already under way.
pub fn cancel(team: &mut FantasyTeam, chip: Chip, started_race: Option<&str>) -> Result<(), ChipError> {
    let state = team.chip_mut(chip);
    if !state.is_active() {
        return Err(ChipError::NotActive(chip));
    }
    if let Some(race_name) = started_race {
        return Err(ChipError::RaceStarted {
            chip,
            race_name: race_name.to_string(),
        });
    }
    state.used = false;
    state.active_race = None;
    Ok(())
}

/// Clear every chip bound to `race_id`. They stay used. Returns the chips
/// that were cleared.
pub fn deactivate_for_race(team: &mut FantasyTeam, race_id: &str) -> Vec<Chip> {
    let mut cleared = Vec::new();
    for chip in Chip::ALL {
        let state = team.chip_mut(chip);
        if state.is_active_for(race_id) {
            state.active_race = None;
            cleared.push(chip);
        }
    }
    cleared
}
