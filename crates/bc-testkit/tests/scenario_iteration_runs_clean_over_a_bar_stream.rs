//! Feeds a long, unremarkable bar stream through the full twelve-step
//! iteration (§4.12) with the core disarmed and asserts every tick
//! completes cleanly — no step should abort just because no position is
//! open and no order can be placed yet.

use bc_schemas::{Bar, Timeframe};
use bc_testkit::Driver;
use chrono::{Duration, Utc};

fn bar(i: i64, close: f64) -> Bar {
    Bar {
        symbol: "EURUSD".into(),
        timeframe: Timeframe::M15,
        ts_utc: Utc::now() + Duration::minutes(15 * i),
        open: close,
        high: close + 0.0010,
        low: close - 0.0010,
        close,
        volume: 100.0,
        forming: false,
    }
}

#[test]
fn disarmed_core_ticks_cleanly_through_a_long_bar_stream() {
    let mut driver = Driver::new("EURUSD", Timeframe::M15, Utc::now());

    for i in 0..120 {
        let close = 1.1000 + (i as f64 * 0.00005).sin() * 0.002;
        let outcome = driver.tick(Timeframe::M15, bar(i, close));
        assert_eq!(outcome, bc_loop::trading_loop::IterationOutcome::Completed, "iteration {i} did not complete cleanly: {outcome:?}");
    }

    assert!(driver.tracker().is_empty(), "no order should ever place while the core is disarmed");
}
