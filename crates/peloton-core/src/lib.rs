// Library root: the scoring engine, team rules, reconciliation and storage,
// exposed for the `peloton` binary and the integration tests.

pub mod chips;
pub mod config;
pub mod db;
pub mod import;
pub mod league;
pub mod manager;
pub mod model;
pub mod reconcile;
pub mod remote;
pub mod roster;
pub mod scoring;
pub mod transfer;

pub use reconcile::{ProcessOutcome, ReconcileSummary, TeamReconciler};
