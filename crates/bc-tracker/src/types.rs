//! Supporting types for the Position Tracker (§4.7): retry policy, pending
//! mutation bookkeeping, and the events/outcomes the tracker emits.

use bc_schemas::Ticket;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    pub modify_retries: u32,
    pub close_retries: u32,
    pub lease_timeout_secs: i64,
    /// Base delay for exponential backoff between modify retries.
    pub retry_backoff_base_secs: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            modify_retries: 3,
            close_retries: 3,
            lease_timeout_secs: 30,
            retry_backoff_base_secs: 2,
        }
    }
}

impl TrackerConfig {
    /// Exponential backoff: `base * 2^(attempt - 1)` seconds.
    pub fn backoff_secs(&self, attempt: u32) -> i64 {
        self.retry_backoff_base_secs.saturating_mul(1i64 << attempt.saturating_sub(1).min(20))
    }
}

/// In-flight modify (SL/TP change) retry state for one ticket.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PendingModify {
    pub attempts: u32,
}

/// In-flight full-close retry state for one ticket.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PendingClose {
    pub attempts: u32,
}

/// Result of a single modify/close attempt, reported by the caller after it
/// talks to the broker; the tracker updates lifecycle state and retry
/// counters from this, it never calls the broker itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
}

/// One tracker-level event, suitable for the audit trail (§6).
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Opened { ticket: Ticket },
    ModifyAbandoned { ticket: Ticket, attempts: u32 },
    CloseEscalated { ticket: Ticket, attempts: u32 },
    ReconciledClosed { ticket: Ticket, realized_pnl: bc_schemas::Micros },
    AdoptionCandidate { ticket: Ticket },
}

/// Outcome of reconciling the tracker's ticket set against
/// `BrokerAdapter::get_positions`, one entry per ticket observed on either
/// side (§4.7 "Reconciliation").
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Present at the broker but not in the tracker: hand to the Adoption
    /// Manager (§4.11).
    AdoptionCandidate { ticket: Ticket },
    /// Tracked but absent from the broker: transitioned to CLOSED.
    ClosedByBroker { ticket: Ticket, realized_pnl: bc_schemas::Micros },
    /// Present on both sides: refreshed current_price/unrealized_pnl/SL/TP
    /// in place, server values win.
    Refreshed { ticket: Ticket },
}
