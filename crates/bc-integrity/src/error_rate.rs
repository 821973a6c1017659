//! Iteration error-rate monitor (§7): a sliding one-hour-window counter of
//! trading-loop iteration errors, mirroring the reject-storm counter this
//! crate's sibling risk engine keeps for order rejects, generalized from
//! "order rejects" to "iteration errors". Exceeding `max_errors_per_hour`
//! requests graceful shutdown with exit code 5 (§6).

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorRateConfig {
    pub max_errors_per_hour: u32,
}

impl Default for ErrorRateConfig {
    fn default() -> Self {
        ErrorRateConfig { max_errors_per_hour: 20 }
    }
}

/// The hour bucket an error falls into, for deterministic window rollover.
pub fn hour_window_id(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(3600)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorRateState {
    window_id: i64,
    count: u32,
}

impl ErrorRateState {
    pub fn new(window_id: i64) -> Self {
        ErrorRateState { window_id, count: 0 }
    }

    fn roll(&mut self, window_id: i64) {
        if window_id != self.window_id {
            self.window_id = window_id;
            self.count = 0;
        }
    }

    /// Records one iteration error in the window containing `window_id`,
    /// resetting the counter first if the window has rolled over.
    pub fn record_error(&mut self, window_id: i64) {
        self.roll(window_id);
        self.count = self.count.saturating_add(1);
    }

    pub fn count_in_window(&self, window_id: i64) -> u32 {
        if window_id == self.window_id {
            self.count
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorRateDecision {
    Continue,
    RequestShutdown { exit_code: u8 },
}

/// The exit code a graceful shutdown triggered by the error-rate ceiling
/// reports (§6).
pub const ERROR_RATE_SHUTDOWN_EXIT_CODE: u8 = 5;

pub fn evaluate(cfg: &ErrorRateConfig, state: &ErrorRateState, window_id: i64) -> ErrorRateDecision {
    if state.count_in_window(window_id) >= cfg.max_errors_per_hour {
        ErrorRateDecision::RequestShutdown { exit_code: ERROR_RATE_SHUTDOWN_EXIT_CODE }
    } else {
        ErrorRateDecision::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_under_ceiling_continues() {
        let cfg = ErrorRateConfig { max_errors_per_hour: 3 };
        let mut state = ErrorRateState::new(0);
        state.record_error(0);
        state.record_error(0);
        assert_eq!(evaluate(&cfg, &state, 0), ErrorRateDecision::Continue);
    }

    #[test]
    fn hitting_ceiling_requests_shutdown_with_exit_code_five() {
        let cfg = ErrorRateConfig { max_errors_per_hour: 3 };
        let mut state = ErrorRateState::new(0);
        state.record_error(0);
        state.record_error(0);
        state.record_error(0);
        assert_eq!(evaluate(&cfg, &state, 0), ErrorRateDecision::RequestShutdown { exit_code: 5 });
    }

    #[test]
    fn window_rollover_resets_the_counter() {
        let cfg = ErrorRateConfig { max_errors_per_hour: 2 };
        let mut state = ErrorRateState::new(0);
        state.record_error(0);
        state.record_error(0);
        assert_eq!(evaluate(&cfg, &state, 0), ErrorRateDecision::RequestShutdown { exit_code: 5 });

        state.record_error(1);
        assert_eq!(evaluate(&cfg, &state, 1), ErrorRateDecision::Continue);
    }

    #[test]
    fn hour_window_id_buckets_by_3600_seconds() {
        let a: DateTime<Utc> = "2026-01-05T00:00:01Z".parse().unwrap();
        let b: DateTime<Utc> = "2026-01-05T00:59:59Z".parse().unwrap();
        let c: DateTime<Utc> = "2026-01-05T01:00:01Z".parse().unwrap();
        assert_eq!(hour_window_id(a), hour_window_id(b));
        assert_ne!(hour_window_id(b), hour_window_id(c));
    }
}
