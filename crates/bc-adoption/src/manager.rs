//! Adoption Manager (§4.11): takes over broker positions the Tracker does
//! not know about. Never opens a new position — it only decides whether an
//! already-live, unmanaged one should be folded into the Tracker, and what
//! default protective stops to attach if policy requires them.

use bc_schemas::{Micros, Position, Side, Ticket};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct AdoptionConfig {
    /// If set, only these symbols may be adopted. `None` means "no
    /// whitelist restriction" (still subject to `blacklist`).
    pub whitelist: Option<Vec<String>>,
    pub blacklist: Vec<String>,
    pub max_age_hours: f64,
    /// When true and the adopted position has no usable SL/TP, derive one
    /// from ATR and return it for the caller to push to the broker.
    pub apply_default_sltp: bool,
    pub default_sl_atr_mult: f64,
    pub default_tp_atr_mult: f64,
}

impl Default for AdoptionConfig {
    fn default() -> Self {
        AdoptionConfig {
            whitelist: None,
            blacklist: Vec::new(),
            max_age_hours: 72.0,
            apply_default_sltp: true,
            default_sl_atr_mult: 2.0,
            default_tp_atr_mult: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdoptionRejection {
    NotWhitelisted,
    Blacklisted,
    TooOld,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdoptionDecision {
    pub ticket: Ticket,
    /// The position as it should be inserted into the Tracker: `adopted`
    /// set, lifecycle forced to `Open`, no originating signal.
    pub position: Position,
    /// Present only when `apply_default_sltp` is on and the broker-side
    /// stop needed filling in; the caller issues the `modify_position`
    /// call, adoption itself never talks to the broker.
    pub default_sl: Option<f64>,
    pub default_tp: Option<f64>,
}

fn is_policy_allowed(config: &AdoptionConfig, symbol: &str) -> Result<(), AdoptionRejection> {
    if config.blacklist.iter().any(|s| s == symbol) {
        return Err(AdoptionRejection::Blacklisted);
    }
    if let Some(wl) = &config.whitelist {
        if !wl.iter().any(|s| s == symbol) {
            return Err(AdoptionRejection::NotWhitelisted);
        }
    }
    Ok(())
}

fn age_hours(position: &Position, now: DateTime<Utc>) -> f64 {
    (now - position.open_ts_utc).num_seconds() as f64 / 3600.0
}

/// `entry − 2·ATR` for a long, `entry + 2·ATR` for a short; target is the
/// mirror image at `4·ATR`.
fn default_stops(config: &AdoptionConfig, side: Side, entry: f64, atr: f64) -> (f64, f64) {
    let sign = side.sign() as f64;
    let sl = entry - sign * config.default_sl_atr_mult * atr;
    let tp = entry + sign * config.default_tp_atr_mult * atr;
    (sl, tp)
}

/// Evaluates every broker position named in `candidate_tickets` (typically
/// the tickets a `bc_tracker::PositionTracker::reconcile` call flagged as
/// `AdoptionCandidate`) against policy, returning one decision per position
/// that passes. `atr_by_symbol` supplies the ATR reading needed to derive
/// default stops; a candidate without one is adopted as-is, SL/TP untouched.
pub fn evaluate_candidates(
    config: &AdoptionConfig,
    candidate_tickets: &[Ticket],
    broker_positions: &[Position],
    now: DateTime<Utc>,
    atr_by_symbol: impl Fn(&str) -> Option<f64>,
) -> Vec<AdoptionDecision> {
    let mut decisions = Vec::new();

    for &ticket in candidate_tickets {
        let Some(broker_pos) = broker_positions.iter().find(|p| p.ticket == ticket) else {
            continue;
        };

        if is_policy_allowed(config, &broker_pos.symbol).is_err() {
            continue;
        }
        if age_hours(broker_pos, now) > config.max_age_hours {
            continue;
        }

        let mut position = broker_pos.clone();
        position.adopted = true;
        position.lifecycle = bc_schemas::LifecycleState::Open;
        position.originating_signal_id = None;
        position.owning_strategy = None;

        let needs_stops = position.current_sl <= 0.0 || position.current_tp <= 0.0;
        let (default_sl, default_tp) = if config.apply_default_sltp && needs_stops {
            match atr_by_symbol(&position.symbol) {
                Some(atr) if atr.is_finite() && atr > 0.0 => {
                    let (sl, tp) = default_stops(config, position.side, position.entry_price, atr);
                    position.current_sl = sl;
                    position.current_tp = tp;
                    (Some(sl), Some(tp))
                }
                _ => (None, None),
            }
        } else {
            (None, None)
        };

        decisions.push(AdoptionDecision { ticket, position, default_sl, default_tp });
    }

    decisions
}
