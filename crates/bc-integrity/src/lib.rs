//! bc-integrity
//!
//! Data Integrity + Lookahead Protection
//!
//! Architectural decisions:
//! - No lookahead ever (reject incomplete bars)
//! - Fail on gap if gap_tolerance = 0
//! - Stale feed disarms system
//! - Feed disagreement policy enforced
//!
//! Pure deterministic logic. No IO, no wall-clock. Runtime provides now_tick and bar_end_ts.

mod arm_state; // sticky disarm + fail-closed boot
mod calendar; // weekend/session-aware gap detection
mod engine;
mod error_rate; // §7 — iteration error-rate ceiling, graceful shutdown
mod types;

pub use arm_state::{ArmState, DisarmReason};
pub use calendar::CalendarSpec;
pub use engine::{evaluate_bar, tick_feed};
pub use error_rate::{
    hour_window_id, ErrorRateConfig, ErrorRateDecision, ErrorRateState, ERROR_RATE_SHUTDOWN_EXIT_CODE,
};
pub use types::*;
