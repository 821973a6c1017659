//! A deterministic in-memory simulator of `bc_broker::BrokerAdapter`
//! (§4.1): the reference broker for tests and paper-trading runs. Orders
//! fill immediately at the last pushed price (plus half the configured
//! spread), positions are kept in a plain map keyed by an internally
//! assigned ticket, and time is whatever the caller last set — there is no
//! wall clock here, so scenario tests stay reproducible.

use std::collections::BTreeMap;

use bc_broker::{BrokerAdapter, BrokerError, BrokerFatal, BrokerTransient};
use bc_schemas::{AccountSnapshot, Bar, BarSeries, Micros, OrderRequest, OrderResult, OrderStatus, Position, Side, Spread, SymbolInfo, Ticket, Timeframe};
use chrono::{DateTime, Utc};

use crate::config::PaperBrokerConfig;

pub struct PaperBroker {
    config: PaperBrokerConfig,
    connected: bool,
    clock: DateTime<Utc>,
    next_ticket: Ticket,
    positions: BTreeMap<Ticket, Position>,
    bars: BTreeMap<Timeframe, BarSeries>,
    last_price: f64,
    balance: Micros,
    peak_balance: Micros,
}

impl PaperBroker {
    pub fn new(config: PaperBrokerConfig, clock: DateTime<Utc>) -> Self {
        let balance = config.starting_balance;
        PaperBroker {
            config,
            connected: false,
            clock,
            next_ticket: 1,
            positions: BTreeMap::new(),
            bars: BTreeMap::new(),
            last_price: 0.0,
            balance,
            peak_balance: balance,
        }
    }

    /// Advances the simulated clock. Tests and the backtest driver call
    /// this once per iteration instead of relying on the wall clock.
    pub fn set_clock(&mut self, now: DateTime<Utc>) {
        self.clock = now;
    }

    /// Feeds one bar into the simulator's history for `timeframe` and
    /// updates the reference price used for fills and mark-to-market.
    pub fn push_bar(&mut self, timeframe: Timeframe, bar: Bar) {
        self.last_price = bar.close;
        self.bars.entry(timeframe).or_insert_with(|| BarSeries::new(4096)).push(bar);
        self.mark_to_market();
    }

    /// Directly places a broker-visible position without going through
    /// `place_order`, for seeding adoption-manager scenarios.
    pub fn seed_untracked_position(&mut self, mut position: Position) -> Ticket {
        position.ticket = self.next_ticket;
        self.next_ticket += 1;
        let ticket = position.ticket;
        self.positions.insert(ticket, position);
        ticket
    }

    fn mark_to_market(&mut self) {
        for pos in self.positions.values_mut() {
            pos.current_price = self.last_price;
            let pnl = (self.last_price - pos.entry_price) * pos.side.sign() as f64 * pos.remaining_volume * self.config.contract_size;
            pos.unrealized_pnl = Micros::from_f64(pnl);
        }
    }

    fn half_spread_price(&self) -> f64 {
        self.config.spread_points * self.config.point / 2.0
    }

    fn require_connected(&self) -> Result<(), BrokerError> {
        if self.connected {
            Ok(())
        } else {
            Err(BrokerError::Transient(BrokerTransient::Disconnected))
        }
    }
}

impl BrokerAdapter for PaperBroker {
    fn connect(&mut self) -> Result<(), BrokerError> {
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn get_account(&self) -> Result<AccountSnapshot, BrokerError> {
        self.require_connected()?;
        let unrealized: Micros = self.positions.values().map(|p| p.unrealized_pnl).fold(Micros::ZERO, |a, b| a + b);
        let equity = self.balance + unrealized;
        let used_margin = self.positions.values().map(|p| Micros::from_f64(p.remaining_volume * p.entry_price * self.config.contract_size / 30.0)).fold(Micros::ZERO, |a, b| a + b);
        let margin_level_pct = equity.ratio(used_margin).map(|r| r * 100.0).unwrap_or(f64::MAX);
        let peak = self.peak_balance.max(self.balance);
        let drawdown_pct = if peak.raw() > 0 { ((peak.as_f64() - self.balance.as_f64()) / peak.as_f64() * 100.0).max(0.0) } else { 0.0 };
        Ok(AccountSnapshot {
            balance: self.balance,
            equity,
            used_margin,
            free_margin: equity.saturating_sub(used_margin),
            margin_level_pct,
            currency: "USD".into(),
            peak_balance: peak,
            drawdown_pct,
        })
    }

    fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BrokerError> {
        self.require_connected()?;
        if symbol != self.config.symbol {
            return Err(BrokerError::Fatal(BrokerFatal { code: "unknown-symbol".into(), message: format!("paper broker only knows {}", self.config.symbol) }));
        }
        Ok(SymbolInfo {
            symbol: self.config.symbol.clone(),
            point: self.config.point,
            volume_min: self.config.volume_min,
            volume_max: self.config.volume_max,
            volume_step: self.config.volume_step,
            stops_level_points: self.config.stops_level_points,
            digits: self.config.digits,
            contract_size: self.config.contract_size,
            trade_allowed: true,
        })
    }

    fn get_bars(&self, symbol: &str, timeframe: Timeframe, count: usize, _timeout_ms: u64) -> Result<Vec<Bar>, BrokerError> {
        self.require_connected()?;
        if symbol != self.config.symbol {
            return Err(BrokerError::Fatal(BrokerFatal { code: "unknown-symbol".into(), message: symbol.to_string() }));
        }
        let Some(series) = self.bars.get(&timeframe) else {
            return Ok(Vec::new());
        };
        let all = series.as_slice();
        let take = count.min(all.len());
        Ok(all[all.len() - take..].to_vec())
    }

    fn get_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, BrokerError> {
        self.require_connected()?;
        Ok(self.positions.values().filter(|p| symbol.map_or(true, |s| s == p.symbol)).cloned().collect())
    }

    fn place_order(&mut self, req: OrderRequest, _timeout_ms: u64) -> Result<OrderResult, BrokerError> {
        self.require_connected()?;
        if req.symbol != self.config.symbol {
            return Ok(OrderResult {
                status: OrderStatus::Rejected,
                filled_volume: 0.0,
                fill_price: 0.0,
                ticket: None,
                server_ts_utc: self.clock,
                broker_error_code: Some("unknown-symbol".into()),
                broker_error_message: Some(req.symbol),
            });
        }
        let half_spread = self.half_spread_price();
        let reference = req.trigger_price.unwrap_or(self.last_price);
        let fill_price = match req.side {
            Side::Long => reference + half_spread,
            Side::Short => reference - half_spread,
        };

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let position = Position {
            ticket,
            symbol: req.symbol.clone(),
            side: req.side,
            open_volume: req.volume,
            remaining_volume: req.volume,
            entry_price: fill_price,
            open_ts_utc: self.clock,
            current_price: fill_price,
            current_sl: req.sl.unwrap_or(0.0),
            current_tp: req.tp.unwrap_or(0.0),
            unrealized_pnl: Micros::ZERO,
            commission: Micros::ZERO,
            swap: Micros::ZERO,
            originating_signal_id: Some(req.signal_id),
            owning_strategy: None,
            adopted: false,
            lifecycle: bc_schemas::LifecycleState::Open,
            tiers_taken: Vec::new(),
        };
        self.positions.insert(ticket, position);

        Ok(OrderResult {
            status: OrderStatus::Filled,
            filled_volume: req.volume,
            fill_price,
            ticket: Some(ticket),
            server_ts_utc: self.clock,
            broker_error_code: None,
            broker_error_message: None,
        })
    }

    fn modify_position(&mut self, ticket: Ticket, new_sl: Option<f64>, new_tp: Option<f64>, _timeout_ms: u64) -> Result<(), BrokerError> {
        self.require_connected()?;
        let pos = self.positions.get_mut(&ticket).ok_or_else(|| BrokerError::Fatal(BrokerFatal { code: "unknown-ticket".into(), message: ticket.to_string() }))?;
        if let Some(sl) = new_sl {
            pos.current_sl = sl;
        }
        if let Some(tp) = new_tp {
            pos.current_tp = tp;
        }
        Ok(())
    }

    fn close_position(&mut self, ticket: Ticket, volume: Option<f64>, _timeout_ms: u64) -> Result<OrderResult, BrokerError> {
        self.require_connected()?;
        let pos = self.positions.get(&ticket).ok_or_else(|| BrokerError::Fatal(BrokerFatal { code: "unknown-ticket".into(), message: ticket.to_string() }))?;
        let close_volume = volume.unwrap_or(pos.remaining_volume).min(pos.remaining_volume);
        let half_spread = self.half_spread_price();
        let fill_price = match pos.side {
            Side::Long => self.last_price - half_spread,
            Side::Short => self.last_price + half_spread,
        };
        let realized = (fill_price - pos.entry_price) * pos.side.sign() as f64 * close_volume * self.config.contract_size;
        self.balance += Micros::from_f64(realized);
        self.peak_balance = self.peak_balance.max(self.balance);

        let remaining = pos.remaining_volume - close_volume;
        if remaining < self.config.volume_min {
            self.positions.remove(&ticket);
        } else {
            let pos = self.positions.get_mut(&ticket).unwrap();
            pos.remaining_volume = remaining;
            pos.lifecycle = bc_schemas::LifecycleState::PartiallyClosed;
        }

        Ok(OrderResult {
            status: OrderStatus::Filled,
            filled_volume: close_volume,
            fill_price,
            ticket: Some(ticket),
            server_ts_utc: self.clock,
            broker_error_code: None,
            broker_error_message: None,
        })
    }

    fn spread(&self, symbol: &str) -> Result<Spread, BrokerError> {
        self.require_connected()?;
        if symbol != self.config.symbol {
            return Err(BrokerError::Fatal(BrokerFatal { code: "unknown-symbol".into(), message: symbol.to_string() }));
        }
        let points = self.config.spread_points;
        let percent = if self.last_price.abs() > f64::EPSILON { points * self.config.point / self.last_price * 100.0 } else { 0.0 };
        Ok(Spread { points, percent })
    }

    fn server_time(&self) -> Result<DateTime<Utc>, BrokerError> {
        self.require_connected()?;
        Ok(self.clock)
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bc_schemas::SignalId;

    fn base_ts() -> DateTime<Utc> {
        "2026-01-05T00:00:00Z".parse().unwrap()
    }

    fn sample_bar(close: f64) -> Bar {
        sample_bar_at(close, 0)
    }

    fn sample_bar_at(close: f64, minute_offset: i64) -> Bar {
        Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M5,
            ts_utc: base_ts() + chrono::Duration::minutes(minute_offset),
            open: close,
            high: close,
            low: close,
            close,
            volume: 100.0,
            forming: false,
        }
    }

    fn sample_order(side: Side, volume: f64) -> OrderRequest {
        OrderRequest {
            symbol: "EURUSD".into(),
            side,
            volume,
            order_type: bc_schemas::OrderType::Market,
            trigger_price: None,
            sl: Some(1.0000),
            tp: Some(1.0200),
            signal_id: SignalId::new_v4(),
            timeout_ms: 0,
        }
    }

    fn connected_broker() -> PaperBroker {
        let mut broker = PaperBroker::new(PaperBrokerConfig::default(), Utc::now());
        broker.connect().unwrap();
        broker.push_bar(Timeframe::M5, sample_bar(1.1000));
        broker
    }

    #[test]
    fn operations_fail_before_connect() {
        let broker = PaperBroker::new(PaperBrokerConfig::default(), Utc::now());
        assert!(matches!(broker.get_account(), Err(BrokerError::Transient(BrokerTransient::Disconnected))));
    }

    #[test]
    fn place_order_fills_long_above_last_price_by_half_spread() {
        let mut broker = connected_broker();
        let result = broker.place_order(sample_order(Side::Long, 1.0), 0).unwrap();
        assert_eq!(result.status, OrderStatus::Filled);
        let half_spread = broker.half_spread_price();
        assert!((result.fill_price - (1.1000 + half_spread)).abs() < 1e-9);
        assert_eq!(broker.get_positions(None).unwrap().len(), 1);
    }

    #[test]
    fn place_order_fills_short_below_last_price_by_half_spread() {
        let mut broker = connected_broker();
        let result = broker.place_order(sample_order(Side::Short, 1.0), 0).unwrap();
        let half_spread = broker.half_spread_price();
        assert!((result.fill_price - (1.1000 - half_spread)).abs() < 1e-9);
    }

    #[test]
    fn close_position_partial_keeps_ticket_alive() {
        let mut broker = connected_broker();
        let opened = broker.place_order(sample_order(Side::Long, 1.0), 0).unwrap();
        let ticket = opened.ticket.unwrap();
        broker.push_bar(Timeframe::M5, sample_bar_at(1.1050, 1));
        let closed = broker.close_position(ticket, Some(0.4), 0).unwrap();
        assert_eq!(closed.filled_volume, 0.4);
        let remaining = broker.get_positions(None).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!((remaining[0].remaining_volume - 0.6).abs() < 1e-9);
        assert_eq!(remaining[0].lifecycle, bc_schemas::LifecycleState::PartiallyClosed);
    }

    #[test]
    fn close_position_full_removes_ticket() {
        let mut broker = connected_broker();
        let opened = broker.place_order(sample_order(Side::Long, 1.0), 0).unwrap();
        let ticket = opened.ticket.unwrap();
        broker.push_bar(Timeframe::M5, sample_bar_at(1.1050, 1));
        broker.close_position(ticket, None, 0).unwrap();
        assert!(broker.get_positions(None).unwrap().is_empty());
    }

    #[test]
    fn get_bars_returns_windowed_tail() {
        let mut broker = connected_broker();
        for i in 0..10 {
            broker.push_bar(Timeframe::M5, sample_bar_at(1.1000 + i as f64 * 0.0001, i as i64 + 1));
        }
        let bars = broker.get_bars("EURUSD", Timeframe::M5, 3, 0).unwrap();
        assert_eq!(bars.len(), 3);
        assert!((bars.last().unwrap().close - 1.1009).abs() < 1e-9);
    }

    #[test]
    fn seed_untracked_position_is_visible_to_get_positions() {
        let mut broker = connected_broker();
        let position = Position {
            ticket: 0,
            symbol: "EURUSD".into(),
            side: Side::Long,
            open_volume: 1.0,
            remaining_volume: 1.0,
            entry_price: 1.1000,
            open_ts_utc: broker.clock,
            current_price: 1.1000,
            current_sl: 1.0900,
            current_tp: 1.1200,
            unrealized_pnl: Micros::ZERO,
            commission: Micros::ZERO,
            swap: Micros::ZERO,
            originating_signal_id: None,
            owning_strategy: None,
            adopted: false,
            lifecycle: bc_schemas::LifecycleState::Open,
            tiers_taken: Vec::new(),
        };
        let ticket = broker.seed_untracked_position(position);
        let positions = broker.get_positions(None).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].ticket, ticket);
    }
}
