//! Shared data model for the trading core: bars, signals, orders, positions,
//! account snapshots and risk decisions. Every other crate in the workspace
//! depends on these types rather than redefining them, so a `Position`
//! constructed by `bc-tracker` is the same `Position` read by `bc-exits` and
//! `bc-modifiers`.

mod money;

pub use money::Micros;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type Ticket = u64;
pub type SignalId = uuid::Uuid;

/// Canonical bar timeframe identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn seconds(self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1_800,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for Long, -1 for Short. Used throughout as the sign convention for
    /// P&L and R-multiple arithmetic.
    pub fn sign(self) -> i64 {
        match self {
            Side::Long => 1,
            Side::Short => -1,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

/// One OHLCV bar for a (symbol, timeframe). `low <= open,close <= high` and
/// `volume >= 0` are invariants enforced at construction by the data layer,
/// not re-checked by every consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub ts_utc: chrono::DateTime<chrono::Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// `true` while this is the most recent, still-updating bar.
    pub forming: bool,
}

impl Bar {
    pub fn is_sane(&self) -> bool {
        self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite()
            && self.volume >= 0.0
            && self.low <= self.open
            && self.low <= self.close
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.high
    }
}

/// An ordered window of bars for one (symbol, timeframe), newest last.
/// Negative indices address from the end (`-1` == newest), matching the
/// convention described for the indicator engine and strategies.
#[derive(Debug, Clone, Default)]
pub struct BarSeries {
    bars: Vec<Bar>,
    capacity: usize,
}

impl BarSeries {
    pub fn new(capacity: usize) -> Self {
        BarSeries {
            bars: Vec::with_capacity(capacity.min(4096)),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a bar if its timestamp is not older than the current last bar.
    /// Returns `false` (and drops the bar) on a non-monotonic timestamp.
    pub fn push(&mut self, bar: Bar) -> bool {
        if let Some(last) = self.bars.last() {
            if bar.ts_utc < last.ts_utc {
                return false;
            }
            if bar.ts_utc == last.ts_utc {
                // Replacing the forming bar with its final values.
                *self.bars.last_mut().unwrap() = bar;
                return true;
            }
        }
        self.bars.push(bar);
        while self.bars.len() > self.capacity {
            self.bars.remove(0);
        }
        true
    }

    /// Negative-index accessor: `-1` is newest, `-2` second newest, etc.
    /// Non-negative indices address from the start, as in a plain slice.
    pub fn get(&self, index: i64) -> Option<&Bar> {
        if index < 0 {
            let back = (-index) as usize;
            if back > self.bars.len() {
                None
            } else {
                self.bars.get(self.bars.len() - back)
            }
        } else {
            self.bars.get(index as usize)
        }
    }

    pub fn newest(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn as_slice(&self) -> &[Bar] {
        &self.bars
    }
}

/// A named scalar or small vector attached to the newest bar of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndicatorValue {
    Scalar(f64),
    Vector(BTreeMap<String, f64>),
}

impl IndicatorValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            IndicatorValue::Scalar(v) => Some(*v),
            IndicatorValue::Vector(_) => None,
        }
    }

    pub fn component(&self, name: &str) -> Option<f64> {
        match self {
            IndicatorValue::Vector(m) => m.get(name).copied(),
            IndicatorValue::Scalar(_) => None,
        }
    }
}

/// Canonical column name for an indicator requirement: `{name}_{param_signature}`.
pub fn indicator_column_name(name: &str, param_signature: &str) -> String {
    if param_signature.is_empty() {
        name.to_string()
    } else {
        format!("{name}_{param_signature}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub ts_utc: chrono::DateTime<chrono::Utc>,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub side: Side,
    pub reference_price: f64,
    pub proposed_sl: f64,
    pub proposed_tp: f64,
    pub confidence: f64,
    pub strategy: String,
    pub metadata: BTreeMap<String, String>,
}

impl Signal {
    /// SL/TP must be on the correct side of the reference price.
    pub fn has_valid_sl_tp(&self) -> bool {
        match self.side {
            Side::Long => self.proposed_sl < self.reference_price && self.reference_price < self.proposed_tp,
            Side::Short => self.proposed_tp < self.reference_price && self.reference_price < self.proposed_sl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfluenceQuality {
    Premium,
    Good,
    Marginal,
    Poor,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryConfluenceResult {
    pub quality: ConfluenceQuality,
    pub overall_score: f64,
    pub level_score: f64,
    pub momentum_score: f64,
    pub timing_score: f64,
    pub structure_score: f64,
    pub size_multiplier: f64,
    pub optimal_entry: Option<f64>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub signal_id: SignalId,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub order_type: OrderType,
    pub trigger_price: Option<f64>,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Filled,
    Partial,
    Rejected,
    Timeout,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub status: OrderStatus,
    pub filled_volume: f64,
    pub fill_price: f64,
    pub ticket: Option<Ticket>,
    pub server_ts_utc: chrono::DateTime<chrono::Utc>,
    pub broker_error_code: Option<String>,
    pub broker_error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    New,
    Open,
    Modifying,
    PartiallyClosed,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: Ticket,
    pub symbol: String,
    pub side: Side,
    pub open_volume: f64,
    pub remaining_volume: f64,
    pub entry_price: f64,
    pub open_ts_utc: chrono::DateTime<chrono::Utc>,
    pub current_price: f64,
    pub current_sl: f64,
    pub current_tp: f64,
    pub unrealized_pnl: Micros,
    pub commission: Micros,
    pub swap: Micros,
    pub originating_signal_id: Option<SignalId>,
    pub owning_strategy: Option<String>,
    pub adopted: bool,
    pub lifecycle: LifecycleState,
    /// Profit-scaler tiers already consumed, by threshold R-multiple
    /// (stored as micro-R, i.e. `r_multiple * 1_000_000`, for exact equality).
    pub tiers_taken: Vec<i64>,
}

impl Position {
    pub fn initial_risk(&self) -> f64 {
        (self.entry_price - self.current_sl).abs()
    }

    /// Current profit expressed in R-multiples of the position's initial risk
    /// at entry (`initial_sl` must be supplied by the caller since `current_sl`
    /// may have since moved).
    pub fn r_multiple(&self, initial_sl: f64) -> f64 {
        let risk = (self.entry_price - initial_sl).abs();
        if risk <= f64::EPSILON {
            0.0
        } else {
            (self.current_price - self.entry_price) * self.side.sign() as f64 / risk
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: Micros,
    pub equity: Micros,
    pub used_margin: Micros,
    pub free_margin: Micros,
    pub margin_level_pct: f64,
    pub currency: String,
    pub peak_balance: Micros,
    pub drawdown_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskRejectionReason {
    MinimumBalance,
    EquityNegative,
    MarginCall,
    DrawdownHalt,
    DailyLossLimit,
    DailyTradeLimit,
    SpreadTooWide,
    MaxPositionsPerSymbol,
    MaxExposurePerSymbol,
    OppositeDirection,
    RiskRewardTooLow,
    ConfidenceTooLow,
    SizingUnavailable,
}

impl std::fmt::Display for RiskRejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskRejectionReason::MinimumBalance => "minimum-balance",
            RiskRejectionReason::EquityNegative => "equity-negative",
            RiskRejectionReason::MarginCall => "margin-call",
            RiskRejectionReason::DrawdownHalt => "drawdown-halt",
            RiskRejectionReason::DailyLossLimit => "daily-loss-limit",
            RiskRejectionReason::DailyTradeLimit => "daily-trade-limit",
            RiskRejectionReason::SpreadTooWide => "spread-too-wide",
            RiskRejectionReason::MaxPositionsPerSymbol => "max-positions-per-symbol",
            RiskRejectionReason::MaxExposurePerSymbol => "max-exposure-per-symbol",
            RiskRejectionReason::OppositeDirection => "opposite-direction",
            RiskRejectionReason::RiskRewardTooLow => "risk-reward-too-low",
            RiskRejectionReason::ConfidenceTooLow => "confidence-too-low",
            RiskRejectionReason::SizingUnavailable => "sizing-unavailable",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDecision {
    pub approved: bool,
    pub rejection_reason: Option<RiskRejectionReason>,
    pub rejection_detail: Option<String>,
    pub approved_volume: f64,
    pub effective_sl: f64,
    pub effective_tp: f64,
    pub applied_tier: Option<String>,
}

impl RiskDecision {
    pub fn reject(reason: RiskRejectionReason, detail: impl Into<String>) -> Self {
        RiskDecision {
            approved: false,
            rejection_reason: Some(reason),
            rejection_detail: Some(detail.into()),
            approved_volume: 0.0,
            effective_sl: 0.0,
            effective_tp: 0.0,
            applied_tier: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitType {
    FlashCrash,
    TrailingStop,
    ProfitTarget,
    TimeBased,
    HardStopLoss,
}

impl ExitType {
    pub fn base_priority(self) -> i32 {
        match self {
            ExitType::FlashCrash => 90,
            ExitType::TrailingStop => 80,
            ExitType::ProfitTarget => 70,
            ExitType::TimeBased => 60,
            ExitType::HardStopLoss => 50,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ExitType::FlashCrash => "flash_crash",
            ExitType::TrailingStop => "trailing_stop",
            ExitType::ProfitTarget => "profit_target",
            ExitType::TimeBased => "time_based",
            ExitType::HardStopLoss => "hard_stop_loss",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitSignal {
    pub ticket: Ticket,
    pub exit_type: ExitType,
    pub priority: i32,
    pub reason: String,
    pub partial_close_volume: Option<f64>,
    pub ts_utc: chrono::DateTime<chrono::Utc>,
}

/// Broker-reported static facts about a tradable symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub point: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    pub stops_level_points: f64,
    pub digits: u32,
    pub contract_size: f64,
    pub trade_allowed: bool,
}

impl SymbolInfo {
    /// Rounds down to `volume_step` and clamps into `[volume_min, volume_max]`.
    pub fn normalize_volume(&self, raw: f64) -> f64 {
        if self.volume_step <= 0.0 {
            return raw.clamp(self.volume_min, self.volume_max);
        }
        let steps = (raw / self.volume_step).floor();
        let rounded = steps * self.volume_step;
        rounded.clamp(self.volume_min, self.volume_max)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Spread {
    pub points: f64,
    pub percent: f64,
}

/// Structured event record emitted to the audit sink (§6 Event sink).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreEvent {
    pub schema_version: u32,
    pub ts_utc: chrono::DateTime<chrono::Utc>,
    pub seq: u64,
    pub event_type: String,
    pub symbol: Option<String>,
    pub ticket: Option<Ticket>,
    pub payload: serde_json::Value,
}

/// Identifies which subsystem currently holds a ticket's mutation lease
/// (§5 "Mutation leases"). Only one of these may hold a given ticket's
/// lease at a time; holders never wait for one another, they skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LeaseOwner {
    DynamicStopManager,
    ProfitScaler,
    ExitCoordinator,
    CommandQueue,
}

/// A per-ticket exclusive lease with an owner and a deadline. Acquiring a
/// lease already held by a different owner fails immediately; acquiring
/// a lease past its deadline is treated as free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LeaseEntry {
    owner: LeaseOwner,
    deadline_ts_utc: chrono::DateTime<chrono::Utc>,
}

/// Tracks mutation leases across every open ticket. Owned by the Position
/// Tracker; consulted by the dynamic stop manager, profit scaler, and exit
/// coordinator before mutating a position.
#[derive(Debug, Clone, Default)]
pub struct MutationLeaseRegistry {
    leases: BTreeMap<Ticket, LeaseEntry>,
}

impl MutationLeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire `ticket`'s lease for `owner` until `deadline`.
    /// Succeeds if the ticket is unleased, already expired, or already
    /// held by the same owner (re-entrant refresh). Fails (returns
    /// `false`, no state change) if a different owner still holds it.
    pub fn try_acquire(&mut self, ticket: Ticket, owner: LeaseOwner, now: chrono::DateTime<chrono::Utc>, deadline: chrono::DateTime<chrono::Utc>) -> bool {
        match self.leases.get(&ticket) {
            Some(entry) if entry.owner != owner && entry.deadline_ts_utc > now => false,
            _ => {
                self.leases.insert(ticket, LeaseEntry { owner, deadline_ts_utc: deadline });
                true
            }
        }
    }

    pub fn release(&mut self, ticket: Ticket, owner: LeaseOwner) {
        if let Some(entry) = self.leases.get(&ticket) {
            if entry.owner == owner {
                self.leases.remove(&ticket);
            }
        }
    }

    /// `true` if `ticket` is currently held by some owner other than
    /// `asking`, as of `now`. Callers use this to defer by one iteration
    /// rather than block.
    pub fn held_by_other(&self, ticket: Ticket, asking: LeaseOwner, now: chrono::DateTime<chrono::Utc>) -> bool {
        match self.leases.get(&ticket) {
            Some(entry) => entry.owner != asking && entry.deadline_ts_utc > now,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar(ts: chrono::DateTime<Utc>, close: f64) -> Bar {
        Bar {
            symbol: "X".into(),
            timeframe: Timeframe::M15,
            ts_utc: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            forming: false,
        }
    }

    #[test]
    fn bar_series_negative_index_is_newest() {
        let mut s = BarSeries::new(3);
        let t0 = Utc::now();
        s.push(bar(t0, 1.0));
        s.push(bar(t0 + chrono::Duration::minutes(15), 2.0));
        s.push(bar(t0 + chrono::Duration::minutes(30), 3.0));
        assert_eq!(s.get(-1).unwrap().close, 3.0);
        assert_eq!(s.get(-2).unwrap().close, 2.0);
    }

    #[test]
    fn bar_series_evicts_beyond_capacity() {
        let mut s = BarSeries::new(2);
        let t0 = Utc::now();
        for i in 0..5 {
            s.push(bar(t0 + chrono::Duration::minutes(15 * i), i as f64));
        }
        assert_eq!(s.len(), 2);
        assert_eq!(s.get(-1).unwrap().close, 4.0);
    }

    #[test]
    fn bar_series_rejects_non_monotonic_timestamp() {
        let mut s = BarSeries::new(5);
        let t0 = Utc::now();
        assert!(s.push(bar(t0, 1.0)));
        assert!(!s.push(bar(t0 - chrono::Duration::minutes(1), 2.0)));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn signal_validates_sl_tp_side() {
        let sig = Signal {
            id: uuid::Uuid::new_v4(),
            ts_utc: Utc::now(),
            symbol: "X".into(),
            timeframe: Timeframe::M15,
            side: Side::Long,
            reference_price: 100.0,
            proposed_sl: 95.0,
            proposed_tp: 110.0,
            confidence: 0.8,
            strategy: "test".into(),
            metadata: Default::default(),
        };
        assert!(sig.has_valid_sl_tp());
    }

    #[test]
    fn symbol_info_normalizes_volume() {
        let info = SymbolInfo {
            symbol: "X".into(),
            point: 0.0001,
            volume_min: 0.1,
            volume_max: 10.0,
            volume_step: 0.1,
            stops_level_points: 5.0,
            digits: 5,
            contract_size: 100_000.0,
            trade_allowed: true,
        };
        assert_eq!(info.normalize_volume(2.37), 2.3);
        assert_eq!(info.normalize_volume(0.01), 0.1);
        assert_eq!(info.normalize_volume(99.0), 10.0);
    }

    #[test]
    fn mutation_lease_blocks_other_owner_until_expiry() {
        let mut reg = MutationLeaseRegistry::new();
        let now = Utc::now();
        let deadline = now + chrono::Duration::seconds(30);
        assert!(reg.try_acquire(1, LeaseOwner::ProfitScaler, now, deadline));
        assert!(!reg.try_acquire(1, LeaseOwner::DynamicStopManager, now, deadline));
        assert!(reg.held_by_other(1, LeaseOwner::DynamicStopManager, now));

        let later = deadline + chrono::Duration::seconds(1);
        assert!(!reg.held_by_other(1, LeaseOwner::DynamicStopManager, later));
        assert!(reg.try_acquire(1, LeaseOwner::DynamicStopManager, later, later + chrono::Duration::seconds(30)));
    }

    #[test]
    fn releasing_lease_frees_it_for_other_owners() {
        let mut reg = MutationLeaseRegistry::new();
        let now = Utc::now();
        let deadline = now + chrono::Duration::seconds(30);
        reg.try_acquire(7, LeaseOwner::ExitCoordinator, now, deadline);
        reg.release(7, LeaseOwner::ExitCoordinator);
        assert!(!reg.held_by_other(7, LeaseOwner::ProfitScaler, now));
    }
}
