//! The broker adapter capability set (§4.1). Any implementation — live,
//! simulated, replay — satisfies this trait; the core depends on nothing
//! else. `bc-broker-paper` ships the one reference implementation.

use crate::error::BrokerError;
use bc_schemas::{AccountSnapshot, Bar, OrderRequest, OrderResult, Position, Spread, SymbolInfo, Ticket, Timeframe};
use chrono::{DateTime, Utc};

pub trait BrokerAdapter: Send {
    /// Idempotent; safe to call repeatedly while already connected.
    fn connect(&mut self) -> Result<(), BrokerError>;

    /// Cheap, non-blocking liveness check.
    fn is_connected(&self) -> bool;

    fn get_account(&self) -> Result<AccountSnapshot, BrokerError>;

    fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BrokerError>;

    /// Returns the latest `count` bars, newest last. Must complete within
    /// `timeout_ms` or fail with a transient timeout.
    fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
        timeout_ms: u64,
    ) -> Result<Vec<Bar>, BrokerError>;

    /// The broker's authoritative view of open positions, optionally
    /// filtered to one symbol.
    fn get_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, BrokerError>;

    fn place_order(&mut self, req: OrderRequest, timeout_ms: u64) -> Result<OrderResult, BrokerError>;

    /// At least one of `new_sl`/`new_tp` must be present.
    fn modify_position(
        &mut self,
        ticket: Ticket,
        new_sl: Option<f64>,
        new_tp: Option<f64>,
        timeout_ms: u64,
    ) -> Result<(), BrokerError>;

    /// Omitted `volume` closes the full remaining position.
    fn close_position(
        &mut self,
        ticket: Ticket,
        volume: Option<f64>,
        timeout_ms: u64,
    ) -> Result<OrderResult, BrokerError>;

    fn spread(&self, symbol: &str) -> Result<Spread, BrokerError>;

    fn server_time(&self) -> Result<DateTime<Utc>, BrokerError>;

    /// Escape hatch for test harnesses that need to drive a concrete
    /// adapter (e.g. feeding bars into `bc-broker-paper::PaperBroker`)
    /// while the core only ever sees it through this trait object.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}
