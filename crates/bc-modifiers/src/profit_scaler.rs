//! Profit Scaler (§4.10): partially closes a position as it clears
//! successive R-multiple tiers, moving SL to breakeven and tightening the
//! trailing factor as tiers are consumed. Each tier fires at most once.

use std::collections::BTreeMap;

use bc_schemas::{AccountSnapshot, LeaseOwner, LifecycleState, MutationLeaseRegistry, Micros, Position, Side, Ticket};
use chrono::{DateTime, Utc};

/// One micro-R unit (`r_multiple * 1_000_000`), matching the representation
/// `Position::tiers_taken` uses.
pub fn r_to_micro(r: f64) -> i64 {
    (r * 1_000_000.0).round() as i64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfitTier {
    pub r_multiple: f64,
    pub close_fraction: f64,
    pub breakeven_on_tier: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfitScalerConfig {
    /// Ascending by `r_multiple`.
    pub tiers: Vec<ProfitTier>,
    pub min_bars_in_trade: u32,
    pub min_profit_amount: Micros,
    /// Fraction of account balance at which unrealized profit triggers an
    /// immediate emergency lock regardless of momentum.
    pub emergency_lock_threshold: f64,
    pub tighter_trailing_factor: f64,
}

impl Default for ProfitScalerConfig {
    fn default() -> Self {
        ProfitScalerConfig {
            tiers: vec![
                ProfitTier { r_multiple: 1.0, close_fraction: 0.20, breakeven_on_tier: true },
                ProfitTier { r_multiple: 1.5, close_fraction: 0.30, breakeven_on_tier: false },
                ProfitTier { r_multiple: 2.0, close_fraction: 0.40, breakeven_on_tier: false },
            ],
            min_bars_in_trade: 3,
            min_profit_amount: Micros::from_f64(1.0),
            emergency_lock_threshold: 0.05,
            tighter_trailing_factor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalerAction {
    pub ticket: Ticket,
    pub close_fraction: f64,
    pub tier_r_micro: i64,
    pub set_breakeven: bool,
    pub tighter_trailing_factor: f64,
    pub emergency: bool,
}

pub struct ProfitScaler {
    config: ProfitScalerConfig,
    initial_sl: BTreeMap<Ticket, f64>,
    bars_in_trade: BTreeMap<Ticket, u32>,
}

impl Default for ProfitScaler {
    fn default() -> Self {
        ProfitScaler::new(ProfitScalerConfig::default())
    }
}

impl ProfitScaler {
    pub fn new(config: ProfitScalerConfig) -> Self {
        ProfitScaler { config, initial_sl: BTreeMap::new(), bars_in_trade: BTreeMap::new() }
    }

    /// Registers a freshly opened (or adopted) position's initial SL, the
    /// reference point for R-multiple math even after the SL later moves.
    pub fn observe_open(&mut self, ticket: Ticket, initial_sl: f64) {
        self.initial_sl.entry(ticket).or_insert(initial_sl);
        self.bars_in_trade.entry(ticket).or_insert(0);
    }

    /// Advances every tracked position's bar-in-trade counter by one. Call
    /// once per iteration.
    pub fn tick_bar(&mut self) {
        for v in self.bars_in_trade.values_mut() {
            *v += 1;
        }
    }

    pub fn forget(&mut self, ticket: Ticket) {
        self.initial_sl.remove(&ticket);
        self.bars_in_trade.remove(&ticket);
    }

    /// `recent_closes` are the most recent bar closes (oldest first,
    /// newest last), used for the "3 of last 5 bars in signal direction"
    /// strong-continuation-momentum check.
    pub fn evaluate(
        &self,
        position: &Position,
        recent_closes: &[f64],
        account: &AccountSnapshot,
        leases: &MutationLeaseRegistry,
        now: DateTime<Utc>,
    ) -> Option<ScalerAction> {
        if !matches!(position.lifecycle, LifecycleState::Open | LifecycleState::PartiallyClosed) {
            return None;
        }
        if leases.held_by_other(position.ticket, LeaseOwner::ProfitScaler, now) {
            return None;
        }
        let initial_sl = *self.initial_sl.get(&position.ticket)?;
        let risk = (position.entry_price - initial_sl).abs().max(1e-9);
        let r_multiple = (position.current_price - position.entry_price) * position.side.sign() as f64 / risk;

        let unrealized_fraction = position.unrealized_pnl.ratio(account.balance.max(Micros::new(1))).unwrap_or(0.0);
        let emergency = unrealized_fraction >= self.config.emergency_lock_threshold;

        let next_tier = self.config.tiers.iter().find(|t| !position.tiers_taken.contains(&r_to_micro(t.r_multiple)) && r_multiple >= t.r_multiple);

        if emergency {
            let deepest_untaken = self
                .config
                .tiers
                .iter()
                .rev()
                .find(|t| !position.tiers_taken.contains(&r_to_micro(t.r_multiple)));
            if let Some(tier) = deepest_untaken {
                return Some(self.action_for(position, tier, true));
            }
        }

        let tier = next_tier?;

        let bars_in_trade = *self.bars_in_trade.get(&position.ticket).unwrap_or(&0);
        if bars_in_trade < self.config.min_bars_in_trade {
            return None;
        }
        if position.unrealized_pnl < self.config.min_profit_amount {
            return None;
        }
        if strong_continuation_momentum(recent_closes, position.side) {
            return None;
        }

        Some(self.action_for(position, tier, false))
    }

    fn action_for(&self, position: &Position, tier: &ProfitTier, emergency: bool) -> ScalerAction {
        ScalerAction {
            ticket: position.ticket,
            close_fraction: tier.close_fraction,
            tier_r_micro: r_to_micro(tier.r_multiple),
            set_breakeven: tier.breakeven_on_tier,
            tighter_trailing_factor: self.config.tighter_trailing_factor,
            emergency,
        }
    }
}

/// `true` if 3 of the last 5 closes moved in the position's favor,
/// signalling the move is still accelerating and scaling should wait.
fn strong_continuation_momentum(recent_closes: &[f64], side: Side) -> bool {
    if recent_closes.len() < 2 {
        return false;
    }
    let window = &recent_closes[recent_closes.len().saturating_sub(6)..];
    let favorable = window
        .windows(2)
        .filter(|w| match side {
            Side::Long => w[1] > w[0],
            Side::Short => w[1] < w[0],
        })
        .count();
    favorable >= 3
}
