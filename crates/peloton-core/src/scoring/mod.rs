// Fantasy points and prize-money calculation.
//
// Everything here is pure: no I/O, no clock. The reconciler feeds it result
// rows and roster flags and persists whatever comes out.

pub mod budget;
pub mod points;
pub mod tables;

pub use points::{
    final_gc_bonus_points, race_result_base_points, race_result_breakdown, race_result_points,
    stage_result_base_points, stage_result_breakdown, stage_result_points, BreakdownLine,
    CaptainRole,
};
