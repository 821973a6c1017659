//! A position opened directly at the broker (e.g. a manual trade, or one
//! surviving a crash with no local record) is discovered on the next
//! reconcile and adopted into the tracker (§8 Scenario D).

use bc_schemas::{Bar, LifecycleState, Micros, Position, Side, Timeframe};
use bc_testkit::Driver;
use chrono::{Duration, Utc};

fn bar(i: i64, close: f64, start: chrono::DateTime<Utc>) -> Bar {
    Bar {
        symbol: "EURUSD".into(),
        timeframe: Timeframe::M15,
        ts_utc: start + Duration::minutes(15 * i),
        open: close,
        high: close + 0.0010,
        low: close - 0.0010,
        close,
        volume: 100.0,
        forming: false,
    }
}

fn unmanaged_position(now: chrono::DateTime<Utc>) -> Position {
    Position {
        ticket: 0, // overwritten by seed_untracked_position
        symbol: "EURUSD".into(),
        side: Side::Long,
        open_volume: 1.0,
        remaining_volume: 1.0,
        entry_price: 1.1000,
        open_ts_utc: now,
        current_price: 1.1000,
        current_sl: 0.0,
        current_tp: 0.0,
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

#[test]
fn unmanaged_position_is_adopted_on_first_reconcile() {
    let start = Utc::now();
    let mut driver = Driver::new("EURUSD", Timeframe::M15, start);

    let ticket = driver.seed_untracked_position(unmanaged_position(start));
    assert!(driver.tracker().get(ticket).is_none(), "tracker should not know about the position yet");

    driver.tick(Timeframe::M15, bar(0, 1.1000, start));

    let adopted = driver.tracker().get(ticket).expect("position should have been adopted");
    assert!(adopted.adopted);
    assert_eq!(adopted.symbol, "EURUSD");
}
