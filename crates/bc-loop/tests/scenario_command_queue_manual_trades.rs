//! Scenario: the command channel (§6, §5)
//!
//! # Invariants under test
//!
//! 1. A `Pause` command suppresses new pending-entry execution but does not
//!    stop `run_iteration` from completing normally.
//! 2. A `ManualOpen` command submitted while armed places an order through
//!    the broker gateway and the resulting position lands in the tracker.
//! 3. A `ManualOpen` command submitted while disarmed is refused by the
//!    gateway's integrity gate — no position is created.
//! 4. A command whose deadline has already passed by the time the queue is
//!    drained is rejected with `DeadlineExceeded` and never reaches the
//!    broker.
//!
//! All tests build a `TradingLoop` directly against `PaperBroker` — no
//! network or HTTP surface is needed since wire framing for the command
//! channel is out of scope.

use bc_broker::BrokerGateway;
use bc_broker_paper::{PaperBroker, PaperBrokerConfig};
use bc_loop::commands::Command;
use bc_loop::trading_loop::{IterationOutcome, LoopConfig, NullEventSink, TradingLoop};
use bc_schemas::{Bar, Side, Timeframe};
use chrono::{DateTime, Duration, Utc};

fn base_ts() -> DateTime<Utc> {
    "2024-01-01T00:00:00Z".parse().unwrap()
}

fn bar(minute_offset: i64, close: f64) -> Bar {
    Bar {
        symbol: "EURUSD".into(),
        timeframe: Timeframe::M5,
        ts_utc: base_ts() + Duration::minutes(minute_offset),
        open: close,
        high: close,
        low: close,
        close,
        volume: 100.0,
        forming: false,
    }
}

fn make_loop() -> TradingLoop {
    let mut broker = PaperBroker::new(PaperBrokerConfig::default(), base_ts());
    broker.connect().unwrap();
    for i in 0..30 {
        broker.push_bar(Timeframe::M5, bar(i, 1.1000 + i as f64 * 0.0001));
    }
    let gateway = BrokerGateway::new(Box::new(broker));
    let config = LoopConfig { symbol: "EURUSD".into(), timeframe: Timeframe::M5, ..LoopConfig::default() };
    TradingLoop::new(config, gateway, Box::new(NullEventSink))
}

// ---------------------------------------------------------------------------
// 1. Pause suppresses new entries but iterations keep completing
// ---------------------------------------------------------------------------

#[test]
fn pause_command_sets_paused_and_iteration_still_completes() {
    let mut loop_ = make_loop();
    let now = base_ts() + Duration::minutes(60);

    loop_.submit_command(Command::Pause, now + Duration::seconds(30), now).unwrap();
    let outcome = loop_.run_iteration(now);

    assert!(loop_.is_paused(), "paused flag must be set after draining Pause");
    assert!(matches!(outcome, IterationOutcome::Completed), "a paused iteration still completes: {outcome:?}");
}

#[test]
fn resume_clears_paused_flag() {
    let mut loop_ = make_loop();
    let now = base_ts() + Duration::minutes(60);

    loop_.submit_command(Command::Pause, now + Duration::seconds(30), now).unwrap();
    loop_.run_iteration(now);
    assert!(loop_.is_paused());

    let now2 = now + Duration::minutes(5);
    loop_.submit_command(Command::Resume, now2 + Duration::seconds(30), now2).unwrap();
    loop_.run_iteration(now2);
    assert!(!loop_.is_paused(), "paused flag must clear after draining Resume");
}

// ---------------------------------------------------------------------------
// 2. ManualOpen while armed places an order and tracks the position
// ---------------------------------------------------------------------------

#[test]
fn manual_open_while_armed_creates_a_tracked_position() {
    let mut loop_ = make_loop();
    loop_.arm();
    let now = base_ts() + Duration::minutes(60);

    loop_
        .submit_command(
            Command::ManualOpen { symbol: "EURUSD".into(), side: Side::Buy, volume: 0.10, sl: Some(1.0950), tp: Some(1.1100), reason: Some("operator override".into()) },
            now + Duration::seconds(30),
            now,
        )
        .unwrap();

    loop_.run_iteration(now);

    assert_eq!(loop_.tracker().len(), 1, "manual open must land a position in the tracker");
}

// ---------------------------------------------------------------------------
// 3. ManualOpen while disarmed is refused by the gateway
// ---------------------------------------------------------------------------

#[test]
fn manual_open_while_disarmed_is_refused() {
    let mut loop_ = make_loop();
    // Fail-closed boot: never armed in this test.
    let now = base_ts() + Duration::minutes(60);

    loop_
        .submit_command(
            Command::ManualOpen { symbol: "EURUSD".into(), side: Side::Buy, volume: 0.10, sl: None, tp: None, reason: None },
            now + Duration::seconds(30),
            now,
        )
        .unwrap();

    loop_.run_iteration(now);

    assert_eq!(loop_.tracker().len(), 0, "disarmed gateway must refuse the manual open");
}

// ---------------------------------------------------------------------------
// 4. A command whose deadline expires before the drain is rejected, not executed
// ---------------------------------------------------------------------------

#[test]
fn expired_command_is_dropped_without_reaching_the_broker() {
    let mut loop_ = make_loop();
    loop_.arm();
    let submit_time = base_ts() + Duration::minutes(60);
    let drain_time = submit_time + Duration::seconds(10);

    loop_
        .submit_command(
            Command::ManualOpen { symbol: "EURUSD".into(), side: Side::Buy, volume: 0.10, sl: None, tp: None, reason: None },
            submit_time + Duration::seconds(5),
            submit_time,
        )
        .unwrap();

    loop_.run_iteration(drain_time);

    assert_eq!(loop_.tracker().len(), 0, "a command past its deadline must never reach the broker");
}
