//! Position Tracker and Lifecycle (§4.7): the authoritative
//! `ticket -> Position` map, its mutation-lease-guarded state machine, and
//! broker reconciliation.

mod tracker;
mod types;

pub use tracker::{PositionTracker, TrackerError};
pub use types::{AttemptOutcome, PendingClose, PendingModify, ReconcileOutcome, TrackerConfig, TrackerEvent};
