//! Entry Confluence Gate (§4.5): scores a raw signal on four weighted
//! components and maps the overall score to a quality class, size
//! multiplier, and action.

use bc_indicators::IndicatorFrame;
use bc_schemas::{BarSeries, ConfluenceQuality, EntryConfluenceResult, Side, Signal};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfluenceWeights {
    pub level: f64,
    pub momentum: f64,
    pub timing: f64,
    pub structure: f64,
}

impl Default for ConfluenceWeights {
    fn default() -> Self {
        ConfluenceWeights { level: 0.40, momentum: 0.25, timing: 0.20, structure: 0.15 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfluenceConfig {
    pub weights: ConfluenceWeights,
    /// Strict mode (production default): MARGINAL and POOR never execute
    /// at reduced size, they must queue or be discarded.
    pub strict_mode: bool,
    pub structure_lookback: usize,
    pub momentum_lookback: usize,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        ConfluenceConfig {
            weights: ConfluenceWeights::default(),
            strict_mode: true,
            structure_lookback: 10,
            momentum_lookback: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    Execute,
    /// Queue for `optimal_entry`, or discard if none is available.
    QueueOrDiscard,
    Reject,
}

pub struct ConfluenceGate {
    config: ConfluenceConfig,
}

impl ConfluenceGate {
    pub fn new(config: ConfluenceConfig) -> Self {
        ConfluenceGate { config }
    }

    pub fn evaluate(&self, signal: &Signal, series: &BarSeries, indicators: &IndicatorFrame) -> EntryConfluenceResult {
        let level = level_score(signal, series);
        let momentum = momentum_score(signal, series, indicators, self.config.momentum_lookback);
        let timing = timing_score(signal, series);
        let structure = structure_score(signal, series, self.config.structure_lookback);

        let w = self.config.weights;
        let weighted = w.level * level + w.momentum * momentum + w.timing * timing + w.structure * structure;
        let overall = (weighted * 100.0).clamp(0.0, 100.0);

        let (quality, size_multiplier) = classify(overall);
        let optimal_entry = if quality == ConfluenceQuality::Marginal || quality == ConfluenceQuality::Poor {
            Some(optimal_entry_price(signal, series))
        } else {
            None
        };
        let rejection_reason = if quality == ConfluenceQuality::Reject {
            Some(format!("overall score {overall:.1} below reject threshold"))
        } else {
            None
        };

        EntryConfluenceResult {
            quality,
            overall_score: overall / 100.0,
            level_score: level,
            momentum_score: momentum,
            timing_score: timing,
            structure_score: structure,
            size_multiplier,
            optimal_entry,
            rejection_reason,
        }
    }

    /// The action the loop should take given this gate's result and the
    /// configured strictness (§4.5 table; strict mode is the production
    /// default and never executes MARGINAL/POOR at reduced size).
    pub fn action_for(&self, result: &EntryConfluenceResult) -> GateAction {
        match result.quality {
            ConfluenceQuality::Premium | ConfluenceQuality::Good => GateAction::Execute,
            ConfluenceQuality::Marginal | ConfluenceQuality::Poor => {
                if self.config.strict_mode {
                    GateAction::QueueOrDiscard
                } else if result.optimal_entry.is_some() {
                    GateAction::QueueOrDiscard
                } else {
                    GateAction::Execute
                }
            }
            ConfluenceQuality::Reject => GateAction::Reject,
        }
    }
}

fn classify(overall: f64) -> (ConfluenceQuality, f64) {
    if overall >= 85.0 {
        (ConfluenceQuality::Premium, 1.0)
    } else if overall >= 70.0 {
        (ConfluenceQuality::Good, 0.85)
    } else if overall >= 50.0 {
        (ConfluenceQuality::Marginal, 0.6)
    } else if overall >= 30.0 {
        (ConfluenceQuality::Poor, 0.3)
    } else {
        (ConfluenceQuality::Reject, 0.0)
    }
}

/// Proximity of the reference price to the nearest identified level: the
/// widest swing high/low in the lookback window, the nearest round number
/// (to two decimals of the quote), and the prior session's extremes.
fn level_score(signal: &Signal, series: &BarSeries) -> f64 {
    let bars = series.as_slice();
    if bars.is_empty() {
        return 0.5;
    }
    let lookback = bars.len().min(50);
    let window = &bars[bars.len() - lookback..];
    let swing_high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let swing_low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let range = (swing_high - swing_low).max(1e-9);

    let round_number = (signal.reference_price / round_step(signal.reference_price)).round() * round_step(signal.reference_price);
    let dist_round = (signal.reference_price - round_number).abs() / range;

    let dist_swing = match signal.side {
        Side::Long => (signal.reference_price - swing_low).abs().min((signal.reference_price - swing_high).abs()),
        Side::Short => (signal.reference_price - swing_high).abs().min((signal.reference_price - swing_low).abs()),
    } / range;

    let prior_session_extreme = prior_session_extreme_distance(signal, bars) / range;

    let proximity = 1.0 - (dist_round.min(1.0) * 0.3 + dist_swing.min(1.0) * 0.5 + prior_session_extreme.min(1.0) * 0.2);
    proximity.clamp(0.0, 1.0)
}

fn round_step(price: f64) -> f64 {
    if price >= 1000.0 {
        10.0
    } else if price >= 10.0 {
        1.0
    } else {
        0.01
    }
}

fn prior_session_extreme_distance(signal: &Signal, bars: &[bc_schemas::Bar]) -> f64 {
    let Some(last) = bars.last() else { return 0.0 };
    let last_day = last.ts_utc.date_naive();
    let prior: Vec<&bc_schemas::Bar> = bars.iter().filter(|b| b.ts_utc.date_naive() != last_day).collect();
    if prior.is_empty() {
        return 0.0;
    }
    let hi = prior.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let lo = prior.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    (signal.reference_price - hi).abs().min((signal.reference_price - lo).abs())
}

/// Alignment of the last N bars' direction with the signal side, confirmed
/// by RSI recovering from an extreme in the signal's direction.
fn momentum_score(signal: &Signal, series: &BarSeries, indicators: &IndicatorFrame, lookback: usize) -> f64 {
    let bars = series.as_slice();
    if bars.len() < 2 {
        return 0.5;
    }
    let lookback = lookback.min(bars.len() - 1);
    let window = &bars[bars.len() - lookback - 1..];
    let aligned = window
        .windows(2)
        .filter(|w| match signal.side {
            Side::Long => w[1].close > w[0].close,
            Side::Short => w[1].close < w[0].close,
        })
        .count();
    let direction_fraction = aligned as f64 / lookback.max(1) as f64;

    let rsi_confirmation = indicators
        .alias("rsi")
        .and_then(bc_schemas::IndicatorValue::as_scalar)
        .map(|rsi| match signal.side {
            Side::Long => ((rsi - 30.0) / 40.0).clamp(0.0, 1.0),
            Side::Short => ((70.0 - rsi) / 40.0).clamp(0.0, 1.0),
        })
        .unwrap_or(0.5);

    (0.6 * direction_fraction + 0.4 * rsi_confirmation).clamp(0.0, 1.0)
}

/// Penalizes chasing: how far into the last bar's range the reference
/// price sits (worse the deeper into the move), and extension from the
/// most recent swing extreme.
fn timing_score(signal: &Signal, series: &BarSeries) -> f64 {
    let Some(last) = series.newest() else { return 0.5 };
    let range = (last.high - last.low).max(1e-9);
    let position_in_range = match signal.side {
        Side::Long => (signal.reference_price - last.low) / range,
        Side::Short => (last.high - signal.reference_price) / range,
    };
    // Entering near the favorable edge of the bar's range is good timing;
    // chasing deep into the opposite extreme is bad timing.
    let chase_penalty = position_in_range.clamp(0.0, 1.0);

    let bars = series.as_slice();
    let lookback = bars.len().min(20);
    let window = &bars[bars.len() - lookback..];
    let swing = match signal.side {
        Side::Long => window.iter().map(|b| b.low).fold(f64::MAX, f64::min),
        Side::Short => window.iter().map(|b| b.high).fold(f64::MIN, f64::max),
    };
    let extension = (signal.reference_price - swing).abs() / range;
    let extension_penalty = (extension / 5.0).clamp(0.0, 1.0);

    (1.0 - 0.6 * chase_penalty - 0.4 * extension_penalty).clamp(0.0, 1.0)
}

/// Higher-highs/higher-lows for LONG, lower-highs/lower-lows for SHORT
/// across the lookback window.
fn structure_score(signal: &Signal, series: &BarSeries, lookback: usize) -> f64 {
    let bars = series.as_slice();
    if bars.len() < 3 {
        return 0.5;
    }
    let lookback = lookback.min(bars.len());
    let window = &bars[bars.len() - lookback..];
    let mut confirms = 0usize;
    let mut total = 0usize;
    for w in window.windows(2) {
        total += 1;
        let higher_high = w[1].high > w[0].high;
        let higher_low = w[1].low > w[0].low;
        let lower_high = w[1].high < w[0].high;
        let lower_low = w[1].low < w[0].low;
        let ok = match signal.side {
            Side::Long => higher_high && higher_low,
            Side::Short => lower_high && lower_low,
        };
        if ok {
            confirms += 1;
        }
    }
    if total == 0 {
        0.5
    } else {
        confirms as f64 / total as f64
    }
}

/// A price the gate would consider a materially better entry: the near
/// edge of the most recent bar's range, which a queued MARGINAL/POOR
/// signal waits to be touched (§4.5 pending-entry queue).
fn optimal_entry_price(signal: &Signal, series: &BarSeries) -> f64 {
    match series.newest() {
        Some(last) => match signal.side {
            Side::Long => last.low.min(signal.reference_price),
            Side::Short => last.high.max(signal.reference_price),
        },
        None => signal.reference_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bc_schemas::Timeframe;
    use chrono::{Duration, Utc};

    fn series_uptrend(n: i64) -> BarSeries {
        let mut s = BarSeries::new(200);
        let t0 = Utc::now();
        for i in 0..n {
            let base = 100.0 + i as f64 * 0.5;
            s.push(bc_schemas::Bar {
                symbol: "X".into(),
                timeframe: Timeframe::M15,
                ts_utc: t0 + Duration::minutes(15 * i),
                open: base,
                high: base + 0.3,
                low: base - 0.3,
                close: base + 0.2,
                volume: 10.0,
                forming: false,
            });
        }
        s
    }

    fn long_signal(price: f64) -> Signal {
        Signal {
            id: uuid::Uuid::new_v4(),
            ts_utc: Utc::now(),
            symbol: "X".into(),
            timeframe: Timeframe::M15,
            side: Side::Long,
            reference_price: price,
            proposed_sl: price - 5.0,
            proposed_tp: price + 10.0,
            confidence: 0.7,
            strategy: "test".into(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn overall_score_bounded_0_100_and_classified() {
        let s = series_uptrend(30);
        let sig = long_signal(s.newest().unwrap().close);
        let gate = ConfluenceGate::new(ConfluenceConfig::default());
        let result = gate.evaluate(&sig, &s, &IndicatorFrame::default());
        assert!((0.0..=1.0).contains(&result.overall_score));
    }

    #[test]
    fn strict_mode_never_executes_marginal_or_poor() {
        let gate = ConfluenceGate::new(ConfluenceConfig { strict_mode: true, ..ConfluenceConfig::default() });
        let marginal = EntryConfluenceResult {
            quality: ConfluenceQuality::Marginal,
            overall_score: 0.55,
            level_score: 0.5,
            momentum_score: 0.5,
            timing_score: 0.5,
            structure_score: 0.5,
            size_multiplier: 0.6,
            optimal_entry: Some(99.0),
            rejection_reason: None,
        };
        assert_eq!(gate.action_for(&marginal), GateAction::QueueOrDiscard);
    }

    #[test]
    fn premium_and_good_always_execute() {
        let gate = ConfluenceGate::new(ConfluenceConfig::default());
        let mut r = EntryConfluenceResult {
            quality: ConfluenceQuality::Premium,
            overall_score: 0.9,
            level_score: 0.9,
            momentum_score: 0.9,
            timing_score: 0.9,
            structure_score: 0.9,
            size_multiplier: 1.0,
            optimal_entry: None,
            rejection_reason: None,
        };
        assert_eq!(gate.action_for(&r), GateAction::Execute);
        r.quality = ConfluenceQuality::Good;
        assert_eq!(gate.action_for(&r), GateAction::Execute);
    }

    #[test]
    fn reject_below_30_is_always_rejected() {
        let gate = ConfluenceGate::new(ConfluenceConfig::default());
        let r = EntryConfluenceResult {
            quality: ConfluenceQuality::Reject,
            overall_score: 0.1,
            level_score: 0.1,
            momentum_score: 0.1,
            timing_score: 0.1,
            structure_score: 0.1,
            size_multiplier: 0.0,
            optimal_entry: None,
            rejection_reason: Some("x".into()),
        };
        assert_eq!(gate.action_for(&r), GateAction::Reject);
    }
}
