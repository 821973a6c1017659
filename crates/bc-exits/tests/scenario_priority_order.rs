//! Scenario: higher-priority exits win even when a lower-priority one
//! would also fire, and ties are broken by strategy name (§4.8).

use bc_exits::ExitCoordinator;
use bc_indicators::IndicatorFrame;
use bc_schemas::{AccountSnapshot, Bar, ExitType, LifecycleState, Micros, MutationLeaseRegistry, Position, Side, Timeframe};
use chrono::{Duration, Utc};

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

fn bar(close: f64, ts: chrono::DateTime<Utc>) -> Bar {
    Bar { symbol: "EURUSD".into(), timeframe: Timeframe::M15, ts_utc: ts, open: close, high: close + 0.1, low: close - 0.1, close, volume: 10.0, forming: false }
}

#[test]
fn hard_stop_and_profit_target_both_eligible_hard_stop_loses_to_higher_priority() {
    // Price has both crossed SL and reached the 3R profit target; profit
    // target (priority 70) must win over hard stop loss (priority 50).
    let now = Utc::now();
    let pos = Position {
        ticket: 1,
        symbol: "EURUSD".into(),
        side: Side::Long,
        open_volume: 1.0,
        remaining_volume: 1.0,
        entry_price: 100.0,
        open_ts_utc: now - Duration::hours(1),
        current_price: 115.0,
        current_sl: 120.0, // already crossed by price direction from above, simulating a server-adjusted SL
        current_tp: 110.0,
        unrealized_pnl: Micros::ZERO,
        commission: Micros::ZERO,
        swap: Micros::ZERO,
        originating_signal_id: None,
        owning_strategy: None,
        adopted: false,
        lifecycle: LifecycleState::Open,
        tiers_taken: vec![],
    };
    let coordinator = ExitCoordinator::default();
    let leases = MutationLeaseRegistry::new();
    let ind = IndicatorFrame::default();
    let acc = account();
    let b = bar(115.0, now);

    let result = coordinator.evaluate(&pos, &b, &[], &ind, &acc, &leases, now).unwrap();
    assert_eq!(result.exit_type, ExitType::ProfitTarget);
}

#[test]
fn nothing_fires_when_no_condition_met() {
    let now = Utc::now();
    let pos = Position {
        ticket: 2,
        symbol: "EURUSD".into(),
        side: Side::Long,
        open_volume: 1.0,
        remaining_volume: 1.0,
        entry_price: 100.0,
        open_ts_utc: now - Duration::minutes(30),
        current_price: 101.0,
        current_sl: 95.0,
        current_tp: 150.0,
        unrealized_pnl: Micros::ZERO,
        commission: Micros::ZERO,
        swap: Micros::ZERO,
        originating_signal_id: None,
        owning_strategy: None,
        adopted: false,
        lifecycle: LifecycleState::Open,
        tiers_taken: vec![],
    };
    let coordinator = ExitCoordinator::default();
    let leases = MutationLeaseRegistry::new();
    let ind = IndicatorFrame::default();
    let acc = account();
    let b = bar(101.0, now);

    assert!(coordinator.evaluate(&pos, &b, &[], &ind, &acc, &leases, now).is_none());
}
