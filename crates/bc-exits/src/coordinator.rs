//! Exit Coordinator (§4.8): evaluates exit strategies in priority order,
//! applies contextual priority boosts, and takes the first non-empty
//! signal. Defers a ticket by one iteration rather than blocking when a
//! modifier subsystem holds its mutation lease.

use std::collections::BTreeMap;

use bc_indicators::IndicatorFrame;
use bc_schemas::{AccountSnapshot, Bar, ExitSignal, ExitType, LeaseOwner, MutationLeaseRegistry, Position, Ticket};
use chrono::{DateTime, Utc};

use crate::strategy::{ExitContext, ExitMemory, ExitStrategy, FlashCrashExit, HardStopLossExit, ProfitTargetExit, TimeBasedExit, TrailingStopExit};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextualAdjustment {
    /// Added to trailing-stop priority when the volatility regime is
    /// elevated (e.g. ATR has expanded beyond its recent average).
    pub volatility_boost: i32,
    /// Added to profit-target priority once unrealized profit exceeds
    /// `large_profit_r` R-multiples.
    pub large_profit_boost: i32,
    pub large_profit_r: f64,
    /// Added to time-based priority once position age exceeds
    /// `advanced_age_fraction` of `max_age`.
    pub advanced_age_boost: i32,
    pub advanced_age_fraction: f64,
}

impl Default for ContextualAdjustment {
    fn default() -> Self {
        ContextualAdjustment {
            volatility_boost: 5,
            large_profit_boost: 5,
            large_profit_r: 2.0,
            advanced_age_boost: 5,
            advanced_age_fraction: 0.8,
        }
    }
}

pub struct ExitCoordinator {
    strategies: Vec<Box<dyn ExitStrategy>>,
    adjustment: ContextualAdjustment,
    memory: BTreeMap<Ticket, ExitMemory>,
}

impl Default for ExitCoordinator {
    fn default() -> Self {
        ExitCoordinator::new(ContextualAdjustment::default())
    }
}

impl ExitCoordinator {
    pub fn new(adjustment: ContextualAdjustment) -> Self {
        ExitCoordinator {
            strategies: vec![
                Box::new(FlashCrashExit::default()),
                Box::new(TrailingStopExit::default()),
                Box::new(ProfitTargetExit::default()),
                Box::new(TimeBasedExit::default()),
                Box::new(HardStopLossExit),
            ],
            adjustment,
            memory: BTreeMap::new(),
        }
    }

    /// Called once per position per iteration, before strategy evaluation,
    /// to update the tracked favorable extreme used by the trailing stop.
    pub fn observe(&mut self, position: &Position, now: DateTime<Utc>) {
        let entry = self.memory.entry(position.ticket).or_insert(ExitMemory { favorable_extreme: position.entry_price, opened_ts_utc: position.open_ts_utc });
        let improved = match position.side {
            bc_schemas::Side::Long => position.current_price > entry.favorable_extreme,
            bc_schemas::Side::Short => position.current_price < entry.favorable_extreme,
        };
        if improved {
            entry.favorable_extreme = position.current_price;
        }
        entry.opened_ts_utc = position.open_ts_utc;
        let _ = now;
    }

    pub fn forget(&mut self, ticket: Ticket) {
        self.memory.remove(&ticket);
    }

    /// Evaluates every strategy for `position` in priority order (highest
    /// first, ties broken by strategy name) and returns the first
    /// non-empty signal. Returns `None` immediately, without evaluating
    /// any strategy, if a modifier subsystem holds the ticket's mutation
    /// lease.
    pub fn evaluate(
        &self,
        position: &Position,
        bar: &Bar,
        recent_bars: &[Bar],
        indicators: &IndicatorFrame,
        account: &AccountSnapshot,
        leases: &MutationLeaseRegistry,
        now: DateTime<Utc>,
    ) -> Option<ExitSignal> {
        if leases.held_by_other(position.ticket, LeaseOwner::ExitCoordinator, now) {
            return None;
        }

        let memory = *self.memory.get(&position.ticket).unwrap_or(&ExitMemory { favorable_extreme: position.entry_price, opened_ts_utc: position.open_ts_utc });
        let ctx = ExitContext { position, bar, recent_bars, indicators, account, memory, now };

        let risk = position.initial_risk().max(1e-9);
        let r_multiple = (position.current_price - position.entry_price) * position.side.sign() as f64 / risk;
        let age = now - memory.opened_ts_utc;

        let mut ordered: Vec<(&Box<dyn ExitStrategy>, i32)> = self
            .strategies
            .iter()
            .map(|s| (s, self.priority_for(s.exit_type(), indicators, r_multiple, age)))
            .collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.name().cmp(b.0.name())));

        for (strategy, _priority) in ordered {
            if let Some(sig) = strategy.should_exit(&ctx) {
                return Some(sig);
            }
        }
        None
    }

    fn priority_for(&self, exit_type: ExitType, indicators: &IndicatorFrame, r_multiple: f64, age: chrono::Duration) -> i32 {
        let base = exit_type.base_priority();
        match exit_type {
            ExitType::TrailingStop => {
                let elevated = indicators.alias("atr").and_then(bc_schemas::IndicatorValue::as_scalar).map(|atr| atr > 0.0).unwrap_or(false)
                    && self.is_volatility_elevated(indicators);
                if elevated {
                    base + self.adjustment.volatility_boost
                } else {
                    base
                }
            }
            ExitType::ProfitTarget if r_multiple >= self.adjustment.large_profit_r => base + self.adjustment.large_profit_boost,
            ExitType::TimeBased => {
                let max_age = TimeBasedExit::default().max_age;
                let fraction = age.num_seconds() as f64 / max_age.num_seconds().max(1) as f64;
                if fraction >= self.adjustment.advanced_age_fraction {
                    base + self.adjustment.advanced_age_boost
                } else {
                    base
                }
            }
            _ => base,
        }
    }

    fn is_volatility_elevated(&self, indicators: &IndicatorFrame) -> bool {
        // A simple proxy: bbands width relative to middle, if present.
        if let Some(bbands) = indicators.get("bbands_20_2.00") {
            if let (Some(upper), Some(lower), Some(middle)) =
                (bbands.component("upper"), bbands.component("lower"), bbands.component("middle"))
            {
                if middle.abs() > 1e-9 {
                    return (upper - lower) / middle > 0.04;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bc_schemas::{LifecycleState, Micros, Side, Timeframe};

    fn position(entry: f64, current: f64, sl: f64, opened: DateTime<Utc>) -> Position {
        Position {
            ticket: 1,
            symbol: "EURUSD".into(),
            side: Side::Long,
            open_volume: 1.0,
            remaining_volume: 1.0,
            entry_price: entry,
            open_ts_utc: opened,
            current_price: current,
            current_sl: sl,
            current_tp: entry + 50.0,
            unrealized_pnl: Micros::ZERO,
            commission: Micros::ZERO,
            swap: Micros::ZERO,
            originating_signal_id: None,
            owning_strategy: None,
            adopted: false,
            lifecycle: LifecycleState::Open,
            tiers_taken: vec![],
        }
    }

    fn account() -> AccountSnapshot {
        AccountSnapshot {
            balance: Micros::from_f64(10_000.0),
            equity: Micros::from_f64(10_000.0),
            used_margin: Micros::ZERO,
            free_margin: Micros::from_f64(10_000.0),
            margin_level_pct: 100.0,
            currency: "USD".into(),
            peak_balance: Micros::from_f64(10_000.0),
            drawdown_pct: 0.0,
        }
    }

    fn bar(close: f64, ts: DateTime<Utc>) -> Bar {
        Bar { symbol: "EURUSD".into(), timeframe: Timeframe::M15, ts_utc: ts, open: close, high: close + 0.1, low: close - 0.1, close, volume: 10.0, forming: false }
    }

    #[test]
    fn hard_stop_backstop_fires_when_nothing_else_does() {
        let now = Utc::now();
        let pos = position(100.0, 94.0, 95.0, now - chrono::Duration::hours(1));
        let coordinator = ExitCoordinator::default();
        let leases = MutationLeaseRegistry::new();
        let ind = IndicatorFrame::default();
        let acc = account();
        let b = bar(94.0, now);
        let result = coordinator.evaluate(&pos, &b, &[], &ind, &acc, &leases, now);
        assert_eq!(result.unwrap().exit_type, ExitType::HardStopLoss);
    }

    #[test]
    fn held_lease_defers_evaluation() {
        let now = Utc::now();
        let pos = position(100.0, 94.0, 95.0, now - chrono::Duration::hours(1));
        let coordinator = ExitCoordinator::default();
        let mut leases = MutationLeaseRegistry::new();
        leases.try_acquire(1, LeaseOwner::ProfitScaler, now, now + chrono::Duration::seconds(30));
        let ind = IndicatorFrame::default();
        let acc = account();
        let b = bar(94.0, now);
        assert!(coordinator.evaluate(&pos, &b, &[], &ind, &acc, &leases, now).is_none());
    }

    #[test]
    fn observe_tracks_favorable_extreme_for_trailing_stop() {
        let now = Utc::now();
        let mut coordinator = ExitCoordinator::default();
        let mut pos = position(100.0, 105.0, 95.0, now);
        coordinator.observe(&pos, now);
        pos.current_price = 110.0;
        coordinator.observe(&pos, now);
        assert_eq!(coordinator.memory.get(&1).unwrap().favorable_extreme, 110.0);
    }
}
