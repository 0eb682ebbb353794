// Points tables.

use crate::model::{RaceType, StageType};

pub const JERSEY_GC_LEADER: u32 = 10;
pub const JERSEY_MOUNTAINS_LEADER: u32 = 5;
pub const JERSEY_POINTS_LEADER: u32 = 5;
pub const JERSEY_YOUNG_LEADER: u32 = 3;

pub const CAPTAIN_MULTIPLIER: u32 = 2;
pub const TRIPLE_CAPTAIN_MULTIPLIER: u32 = 3;

const STAGE_POINTS: [u32; 20] = [
    50, 40, 35, 30, 25, 22, 20, 18, 16, 14, 12, 10, 8, 6, 5, 4, 3, 2, 1, 1,
];

const FINAL_GC_BONUS: [u32; 10] = [200, 150, 100, 80, 60, 50, 40, 35, 30, 25];

/// Whole-race result of a one-day classic.
pub fn one_day_points(position: u32) -> u32 {
    match position {
        1 => 100,
        2 => 70,
        3 => 50,
        4 => 40,
        5 => 35,
        6 => 30,
        7 => 25,
        8 => 20,
        9 => 15,
        10 => 10,
        11..=20 => 5,
        21..=30 => 2,
        _ => 0,
    }
}

/// Whole-race result of a stage race or grand tour.
pub fn stage_race_points(position: u32) -> u32 {
    match position {
        1 => 50,
        2 => 35,
        3 => 25,
        4 => 18,
        5 => 12,
        6 => 10,
        7 => 8,
        8 => 6,
        9 => 4,
        10 => 2,
        11..=20 => 1,
        _ => 0,
    }
}

pub fn race_position_points(position: u32, race_type: RaceType) -> u32 {
    match race_type {
        RaceType::OneDay => one_day_points(position),
        RaceType::GrandTour | RaceType::StageRace => stage_race_points(position),
    }
}

/// Per-stage table before the stage-type multiplier.
pub fn stage_base_points(position: u32) -> u32 {
    lookup(&STAGE_POINTS, position)
}

/// Per-stage table with the stage multiplier applied, truncated toward zero.
pub fn stage_points(position: u32, stage_type: StageType) -> u32 {
    stage_base_points(position) * stage_type.multiplier_tenths() / 10
}

pub fn final_gc_bonus(gc_position: u32) -> u32 {
    lookup(&FINAL_GC_BONUS, gc_position)
}

fn lookup(table: &[u32], position: u32) -> u32 {
    if position == 0 {
        return 0;
    }
    table.get(position as usize - 1).copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_day_table_edges() {
        assert_eq!(one_day_points(1), 100);
        assert_eq!(one_day_points(10), 10);
        assert_eq!(one_day_points(11), 5);
        assert_eq!(one_day_points(20), 5);
        assert_eq!(one_day_points(21), 2);
        assert_eq!(one_day_points(30), 2);
        assert_eq!(one_day_points(31), 0);
        assert_eq!(one_day_points(0), 0);
    }

    #[test]
    fn stage_race_table_edges() {
        assert_eq!(stage_race_points(1), 50);
        assert_eq!(stage_race_points(4), 18);
        assert_eq!(stage_race_points(20), 1);
        assert_eq!(stage_race_points(21), 0);
    }

    #[test]
    fn stage_multiplier_truncates() {
        // 14 * 1.2 = 16.8
        assert_eq!(stage_points(10, StageType::Mountain), 16);
        // 14 * 0.5 = 7
        assert_eq!(stage_points(10, StageType::Prologue), 7);
        assert_eq!(stage_points(2, StageType::Itt), 48);
        assert_eq!(stage_points(19, StageType::Prologue), 0);
        assert_eq!(stage_points(1, StageType::Flat), 50);
        assert_eq!(stage_points(21, StageType::Mountain), 0);
    }

    #[test]
    fn final_gc_bonus_top_ten_only() {
        assert_eq!(final_gc_bonus(1), 200);
        assert_eq!(final_gc_bonus(10), 25);
        assert_eq!(final_gc_bonus(11), 0);
        assert_eq!(final_gc_bonus(0), 0);
    }
}
