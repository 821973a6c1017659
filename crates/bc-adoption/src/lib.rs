//! bc-adoption
//!
//! Reconciliation Engine
//!
//! Architectural decisions:
//! - Broker snapshot reconciliation required before LIVE
//! - Divergence triggers HALT
//! - Unknown broker order triggers HALT
//! - Position mismatch triggers HALT
//! - Clean reconcile required before arming
//!
//! Deterministic, pure logic. No IO. No broker calls.

mod engine;
mod gate; // arm/start gate + drift tick
mod manager;
mod types;
mod watermark; // snapshot freshness + monotonicity watermark

pub mod snapshot_adapter;

// §4.11 — the actual Adoption Manager: policy-gated takeover of unmanaged
// broker positions into the Tracker.
pub use manager::{evaluate_candidates, AdoptionConfig, AdoptionDecision, AdoptionRejection};

// reconcile_monotonic is the required production path; it enforces
// snapshot monotonicity via SnapshotWatermark before running content comparison.
// StaleBrokerSnapshot is returned when a snapshot fails the watermark check.
pub use engine::{is_clean_reconcile, reconcile, reconcile_monotonic, StaleBrokerSnapshot};

// mandatory gate API for arm/start and periodic drift monitoring.
pub use gate::{check_arm_gate, check_start_gate, reconcile_tick, ArmStartGate, DriftAction};
pub use snapshot_adapter::{
    normalize, normalize_json, normalize_lenient, RawBrokerOrder, RawBrokerPosition,
    RawBrokerSnapshot, SnapshotAdapterError,
};
pub use types::*;
// snapshot freshness + monotonicity enforcement.
pub use watermark::{SnapshotFreshness, SnapshotWatermark};
