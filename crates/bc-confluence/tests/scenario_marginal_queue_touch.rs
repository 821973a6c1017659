//! Scenario: a MARGINAL-quality signal is queued instead of executed under
//! strict mode, then triggers when price touches `optimal_entry` within
//! `max_wait_bars`, or expires if it never does (§4.5, §8 Scenario E).

use bc_confluence::{ConfluenceConfig, ConfluenceGate, GateAction, PendingEntryQueue, PendingOutcome};
use bc_indicators::IndicatorFrame;
use bc_schemas::{Bar, BarSeries, ConfluenceQuality, EntryConfluenceResult, Side, Signal, Timeframe};
use chrono::{Duration, Utc};

fn flat_series(n: i64) -> BarSeries {
    let mut s = BarSeries::new(200);
    let t0 = Utc::now();
    for i in 0..n {
        s.push(Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M15,
            ts_utc: t0 + Duration::minutes(15 * i),
            open: 100.0,
            high: 100.5,
            low: 99.5,
            close: 100.0,
            volume: 10.0,
            forming: false,
        });
    }
    s
}

fn marginal_result() -> EntryConfluenceResult {
    EntryConfluenceResult {
        quality: ConfluenceQuality::Marginal,
        overall_score: 0.55,
        level_score: 0.5,
        momentum_score: 0.5,
        timing_score: 0.6,
        structure_score: 0.5,
        size_multiplier: 0.6,
        optimal_entry: Some(99.0),
        rejection_reason: None,
    }
}

fn long_signal(price: f64) -> Signal {
    Signal {
        id: uuid::Uuid::new_v4(),
        ts_utc: Utc::now(),
        symbol: "EURUSD".into(),
        timeframe: Timeframe::M15,
        side: Side::Long,
        reference_price: price,
        proposed_sl: price - 5.0,
        proposed_tp: price + 10.0,
        confidence: 0.55,
        strategy: "test".into(),
        metadata: Default::default(),
    }
}

#[test]
fn marginal_signal_queues_under_strict_mode_and_executes_on_touch() {
    let gate = ConfluenceGate::new(ConfluenceConfig { strict_mode: true, ..ConfluenceConfig::default() });
    let result = marginal_result();
    assert_eq!(gate.action_for(&result), GateAction::QueueOrDiscard);

    let mut queue = PendingEntryQueue::new(10);
    let signal = long_signal(100.0);
    queue.push(signal.clone(), result.optimal_entry.unwrap(), 5);

    // Three bars pass without price touching 99.
    for _ in 0..3 {
        let out = queue.tick(100.5, 99.5);
        assert!(out.is_empty());
    }

    // Fourth bar's low touches the optimal entry.
    let out = queue.tick(100.2, 98.9);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].1, PendingOutcome::Touched);
    assert_eq!(out[0].0.signal.id, signal.id);
}

#[test]
fn marginal_signal_expires_if_optimal_entry_never_touched() {
    let mut queue = PendingEntryQueue::new(10);
    let signal = long_signal(100.0);
    queue.push(signal, 99.0, 5);

    for _ in 0..4 {
        assert!(queue.tick(100.5, 99.5).is_empty());
    }
    let out = queue.tick(100.5, 99.5);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].1, PendingOutcome::Expired);
}

#[test]
fn evaluate_on_flat_series_produces_classified_result() {
    let gate = ConfluenceGate::new(ConfluenceConfig::default());
    let series = flat_series(20);
    let signal = long_signal(100.0);
    let result = gate.evaluate(&signal, &series, &IndicatorFrame::default());
    assert!((0.0..=1.0).contains(&result.overall_score));
    match result.quality {
        ConfluenceQuality::Premium => assert_eq!(result.size_multiplier, 1.0),
        ConfluenceQuality::Good => assert_eq!(result.size_multiplier, 0.85),
        ConfluenceQuality::Marginal => assert_eq!(result.size_multiplier, 0.6),
        ConfluenceQuality::Poor => assert_eq!(result.size_multiplier, 0.3),
        ConfluenceQuality::Reject => assert_eq!(result.size_multiplier, 0.0),
    }
}
