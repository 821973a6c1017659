//! Configuration and supporting types for the Risk Evaluator (§4.6).

use bc_schemas::{Micros, RiskRejectionReason};

/// One balance tier's maximum stop-loss-as-fraction-of-balance (§4.6 rule 10).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceTier {
    /// Upper bound of this tier's balance, exclusive of the `large` tier
    /// which has no upper bound (`None`).
    pub upper_bound: Option<Micros>,
    pub max_sl_pct: f64,
}

/// The four tiers from §4.6 rule 10: `tiny (<=1k) -> 1%`, `small (<=5k) ->
/// 2%`, `medium (<=20k) -> 5%`, `large (>20k) -> 5%`. The historical bug
/// where `large` used 25% is explicitly forbidden by this spec; the fixed
/// table below never produces anything above the hard cap.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceTierTable {
    pub tiers: Vec<BalanceTier>,
    /// Absolute ceiling enforced regardless of configuration (§4.6: 15%).
    pub hard_cap_pct: f64,
}

impl Default for BalanceTierTable {
    fn default() -> Self {
        BalanceTierTable {
            tiers: vec![
                BalanceTier { upper_bound: Some(Micros::from_f64(1_000.0)), max_sl_pct: 1.0 },
                BalanceTier { upper_bound: Some(Micros::from_f64(5_000.0)), max_sl_pct: 2.0 },
                BalanceTier { upper_bound: Some(Micros::from_f64(20_000.0)), max_sl_pct: 5.0 },
                BalanceTier { upper_bound: None, max_sl_pct: 5.0 },
            ],
            hard_cap_pct: 15.0,
        }
    }
}

impl BalanceTierTable {
    /// Returns the max-SL-percent for `balance`, clamped to the hard cap.
    /// A configured tier value at or above the hard cap is reduced (and the
    /// caller should log this — §4.6: "any configured value >=15% is
    /// reduced and logged").
    pub fn max_sl_pct_for_balance(&self, balance: Micros) -> f64 {
        let tier_pct = self
            .tiers
            .iter()
            .find(|t| match t.upper_bound {
                Some(bound) => balance <= bound,
                None => true,
            })
            .map(|t| t.max_sl_pct)
            .unwrap_or(self.hard_cap_pct);
        tier_pct.min(self.hard_cap_pct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingMethod {
    Fixed,
    PercentRisk,
    AtrVolatility,
    Kelly,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KellyConfig {
    /// Recent win rate in [0, 1].
    pub win_rate: f64,
    /// Average win / average loss ("payoff ratio").
    pub payoff_ratio: f64,
    /// Cap applied to the raw Kelly fraction, e.g. `0.5` for half-Kelly.
    pub fraction_cap: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizingConfig {
    pub method: SizingMethod,
    /// Used by `Fixed` sizing: a constant lot size.
    pub fixed_volume: f64,
    /// Used by `PercentRisk` and `AtrVolatility`: fraction of balance
    /// risked per trade, e.g. `0.02` for 2%.
    pub risk_pct: f64,
    /// Value of one point move for one lot, in account currency
    /// (`point_value` in the spec's percent-risk formula).
    pub point_value: f64,
    pub kelly: KellyConfig,
    /// Optional recent-winrate performance multiplier, clamped to
    /// `[0.75, 1.15]` (§4.6 rule 11). `None` disables the adjustment.
    pub performance_multiplier: Option<f64>,
}

impl Default for SizingConfig {
    fn default() -> Self {
        SizingConfig {
            method: SizingMethod::PercentRisk,
            fixed_volume: 0.1,
            risk_pct: 0.02,
            point_value: 1.0,
            kelly: KellyConfig { win_rate: 0.5, payoff_ratio: 1.5, fraction_cap: 0.5 },
            performance_multiplier: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskConfig {
    pub min_balance: Micros,
    /// Drawdown fraction (peak - balance) / peak at or above which new
    /// entries are rejected outright (§4.6 rule 2).
    pub drawdown_halt_pct: f64,
    /// Softer drawdown threshold below `drawdown_halt_pct`; breaching it
    /// reduces sizing multipliers instead of rejecting ("survival mode").
    pub drawdown_survival_pct: f64,
    pub survival_size_multiplier: f64,
    pub min_margin_level_pct: f64,
    pub daily_loss_limit: Micros,
    pub daily_trade_limit: u32,
    pub max_spread_points: f64,
    pub max_spread_pct: f64,
    pub max_positions_per_symbol: u32,
    pub max_exposure_per_symbol_pct: f64,
    pub hedging_enabled: bool,
    pub min_risk_reward_ratio: f64,
    pub min_confidence: f64,
    pub sizing: SizingConfig,
    pub balance_tiers: BalanceTierTable,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            min_balance: Micros::from_f64(100.0),
            drawdown_halt_pct: 25.0,
            drawdown_survival_pct: 15.0,
            survival_size_multiplier: 0.5,
            min_margin_level_pct: 100.0,
            daily_loss_limit: Micros::new(i64::MAX / 2),
            daily_trade_limit: u32::MAX,
            max_spread_points: 30.0,
            max_spread_pct: 0.1,
            max_positions_per_symbol: 1,
            max_exposure_per_symbol_pct: 100.0,
            hedging_enabled: false,
            min_risk_reward_ratio: 1.5,
            min_confidence: 0.5,
            sizing: SizingConfig::default(),
            balance_tiers: BalanceTierTable::default(),
        }
    }
}

/// Per-day counters the caller (trading loop) maintains and passes in;
/// the evaluator is otherwise pure and holds no time-based state itself.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DailyCounters {
    pub realized_loss_today: Micros,
    pub trades_today: u32,
}

/// Snapshot of everything the evaluator needs about the current market
/// and symbol to approve or reject a signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketContext {
    pub spread_points: f64,
    pub spread_pct: f64,
}

/// The fixed evaluation order from §4.6 (rules 1-8; sizing is rule 9-11 and
/// never itself a fail-fast rejection point except `SizingUnavailable`).
pub(crate) const EVALUATION_ORDER_DOC: &[RiskRejectionReason] = &[
    RiskRejectionReason::MinimumBalance,
    RiskRejectionReason::EquityNegative,
    RiskRejectionReason::MarginCall,
    RiskRejectionReason::DrawdownHalt,
    RiskRejectionReason::DailyLossLimit,
    RiskRejectionReason::DailyTradeLimit,
    RiskRejectionReason::SpreadTooWide,
    RiskRejectionReason::MaxPositionsPerSymbol,
    RiskRejectionReason::MaxExposurePerSymbol,
    RiskRejectionReason::OppositeDirection,
    RiskRejectionReason::RiskRewardTooLow,
    RiskRejectionReason::ConfidenceTooLow,
];
