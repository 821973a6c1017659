//! A deterministic scenario driver for `bc_loop::trading_loop::TradingLoop`
//! (§4.12, §8 "Scenario catalogue"): wires the loop to `bc-broker-paper`'s
//! in-memory broker and drives both the loop's and the broker's clocks from
//! the bar stream instead of the wall clock, so scenario tests reproduce
//! bit-for-bit.

use bc_broker::{BrokerAdapter, BrokerGateway};
use bc_broker_paper::{PaperBroker, PaperBrokerConfig};
use bc_loop::trading_loop::{EventSink, IterationOutcome, LoopConfig, NullEventSink, TradingLoop};
use bc_schemas::{Bar, Position, Ticket, Timeframe};
use bc_tracker::PositionTracker;
use chrono::{DateTime, Utc};
use std::any::Any;

/// Owns a `TradingLoop` wired to a `PaperBroker` and exposes the handful of
/// operations a scenario test needs: feed a bar, advance the clock, arm or
/// disarm the core, and inspect the resulting tracker state.
pub struct Driver {
    loop_: TradingLoop,
}

impl Driver {
    /// Builds a driver with `LoopConfig::default()` except for `symbol` and
    /// `timeframe`, a `PaperBrokerConfig::default()` matching that symbol,
    /// and a `NullEventSink`.
    pub fn new(symbol: &str, timeframe: Timeframe, start: DateTime<Utc>) -> Self {
        let loop_config = LoopConfig {
            symbol: symbol.into(),
            timeframe,
            ..LoopConfig::default()
        };
        let broker_config = PaperBrokerConfig { symbol: symbol.into(), ..PaperBrokerConfig::default() };
        Self::with_config(loop_config, broker_config, start, Box::new(NullEventSink))
    }

    pub fn with_config(
        loop_config: LoopConfig,
        broker_config: PaperBrokerConfig,
        start: DateTime<Utc>,
        sink: Box<dyn EventSink>,
    ) -> Self {
        let mut broker = PaperBroker::new(broker_config, start);
        broker.connect().expect("paper broker connect never fails");
        let gateway = BrokerGateway::new(Box::new(broker));
        Driver { loop_: TradingLoop::new(loop_config, gateway, sink) }
    }

    /// Feeds one bar into the paper broker, advances both clocks to the
    /// bar's close, and runs one full iteration of the loop.
    pub fn tick(&mut self, timeframe: Timeframe, bar: Bar) -> IterationOutcome {
        let now = bar.ts_utc;
        self.paper_broker_mut().set_clock(now);
        self.paper_broker_mut().push_bar(timeframe, bar);
        self.loop_.run_iteration(now)
    }

    /// Runs an iteration without feeding a new bar — for exercising the
    /// health-check and monitor steps against an unchanged price.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> IterationOutcome {
        self.paper_broker_mut().set_clock(now);
        self.loop_.run_iteration(now)
    }

    pub fn arm(&mut self) {
        self.loop_.arm();
    }

    pub fn disarm(&mut self) {
        self.loop_.disarm();
    }

    pub fn is_armed(&self) -> bool {
        self.loop_.arm_state().is_armed()
    }

    pub fn tracker(&self) -> &PositionTracker {
        self.loop_.tracker()
    }

    /// Seeds a broker-visible position the local tracker does not yet know
    /// about, for exercising the adoption path (§8 Scenario D).
    pub fn seed_untracked_position(&mut self, position: Position) -> Ticket {
        self.paper_broker_mut().seed_untracked_position(position)
    }

    fn paper_broker_mut(&mut self) -> &mut PaperBroker {
        self.loop_
            .broker_adapter_mut()
            .as_any_mut()
            .downcast_mut::<PaperBroker>()
            .expect("Driver always wires a PaperBroker")
    }
}
