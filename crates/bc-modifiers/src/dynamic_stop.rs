//! Dynamic Stop Manager (§4.9): tightens a position's stop loss toward
//! its favorable extreme as ATR trails it down, never loosening, subject
//! to broker distance constraints and a drawdown-aware shrink factor.

use std::collections::BTreeMap;

use bc_schemas::{AccountSnapshot, LeaseOwner, LifecycleState, MutationLeaseRegistry, Position, Side, SymbolInfo, Ticket};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicStopConfig {
    /// ATR multiplier (k) defining the trailing distance from the
    /// favorable extreme.
    pub atr_mult: f64,
    /// Sanity clamp: the candidate SL must be at least this fraction of
    /// the current price away from it.
    pub min_sl_distance_fraction: f64,
    /// Only emit a modify when the candidate differs from the current SL
    /// by more than this many price units.
    pub min_tick_delta: f64,
    /// Floor of the drawdown shrink factor (§4.9 "[0.5, 1.0]").
    pub shrink_floor: f64,
    /// Drawdown percentage at which the shrink factor reaches its floor.
    pub drawdown_full_shrink_pct: f64,
}

impl Default for DynamicStopConfig {
    fn default() -> Self {
        DynamicStopConfig {
            atr_mult: 2.5,
            min_sl_distance_fraction: 0.0005,
            min_tick_delta: 0.0001,
            shrink_floor: 0.5,
            drawdown_full_shrink_pct: 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopCandidate {
    pub ticket: Ticket,
    pub new_sl: f64,
}

/// Drawdown-aware shrink factor: 1.0 at zero drawdown, linearly falling
/// to `floor` once drawdown reaches `full_shrink_pct`.
pub fn shrink_factor(drawdown_pct: f64, floor: f64, full_shrink_pct: f64) -> f64 {
    if full_shrink_pct <= 0.0 {
        return floor;
    }
    let t = (drawdown_pct / full_shrink_pct).clamp(0.0, 1.0);
    1.0 - t * (1.0 - floor)
}

pub struct DynamicStopManager {
    config: DynamicStopConfig,
    favorable_extreme: BTreeMap<Ticket, f64>,
}

impl Default for DynamicStopManager {
    fn default() -> Self {
        DynamicStopManager::new(DynamicStopConfig::default())
    }
}

impl DynamicStopManager {
    pub fn new(config: DynamicStopConfig) -> Self {
        DynamicStopManager { config, favorable_extreme: BTreeMap::new() }
    }

    /// Updates the tracked favorable extreme for `position`. Call once per
    /// iteration before `evaluate`.
    pub fn observe(&mut self, position: &Position) {
        let entry = self.favorable_extreme.entry(position.ticket).or_insert(position.entry_price);
        let improved = match position.side {
            Side::Long => position.current_price > *entry,
            Side::Short => position.current_price < *entry,
        };
        if improved {
            *entry = position.current_price;
        }
    }

    pub fn forget(&mut self, ticket: Ticket) {
        self.favorable_extreme.remove(&ticket);
    }

    pub fn evaluate(
        &self,
        position: &Position,
        symbol_info: &SymbolInfo,
        atr: f64,
        account: &AccountSnapshot,
        leases: &MutationLeaseRegistry,
        now: DateTime<Utc>,
    ) -> Option<StopCandidate> {
        if !matches!(position.lifecycle, LifecycleState::Open | LifecycleState::PartiallyClosed) {
            return None;
        }
        if leases.held_by_other(position.ticket, LeaseOwner::DynamicStopManager, now) {
            return None;
        }

        let extreme = *self.favorable_extreme.get(&position.ticket).unwrap_or(&position.entry_price);
        let shrink = shrink_factor(account.drawdown_pct, self.config.shrink_floor, self.config.drawdown_full_shrink_pct);
        let k = self.config.atr_mult * shrink;

        let raw = match position.side {
            Side::Long => extreme - k * atr,
            Side::Short => extreme + k * atr,
        };
        let tightened = match position.side {
            Side::Long => raw.max(position.current_sl),
            Side::Short => raw.min(position.current_sl),
        };
        if (tightened - position.current_sl).abs() <= f64::EPSILON {
            return None;
        }

        let min_broker_distance = symbol_info.stops_level_points * symbol_info.point;
        let min_sanity_distance = position.current_price * self.config.min_sl_distance_fraction;
        let min_distance = min_broker_distance.max(min_sanity_distance);
        if (position.current_price - tightened).abs() < min_distance {
            return None;
        }

        if (tightened - position.current_sl).abs() <= self.config.min_tick_delta {
            return None;
        }

        Some(StopCandidate { ticket: position.ticket, new_sl: tightened })
    }
}
