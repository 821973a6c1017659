//! Market regime detection (§4.4 dynamic selector): classifies the current
//! bar window into one of `{trending_up, trending_down, ranging, volatile,
//! consolidating}` from ADX, ATR, Bollinger width, and recent returns.

use bc_indicators::functions;
use bc_schemas::BarSeries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    Consolidating,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeConfig {
    pub adx_period: u32,
    pub atr_period: u32,
    pub bb_period: u32,
    pub returns_lookback: usize,
    /// ADX at or above this confirms a trend (direction from DI+/DI-).
    pub trend_adx_threshold: f64,
    /// ATR as a fraction of price at or above this, OR the stdev of recent
    /// returns at or above `volatile_returns_stdev`, marks the regime
    /// volatile (checked only once the trend test has failed).
    pub volatile_atr_pct: f64,
    pub volatile_returns_stdev: f64,
    /// Bollinger bandwidth `(upper - lower) / middle` at or below this,
    /// with no trend and no volatility, marks consolidation; otherwise the
    /// fallback is plain ranging.
    pub consolidating_bandwidth: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        RegimeConfig {
            adx_period: 14,
            atr_period: 14,
            bb_period: 20,
            returns_lookback: 20,
            trend_adx_threshold: 25.0,
            volatile_atr_pct: 0.015,
            volatile_returns_stdev: 0.01,
            consolidating_bandwidth: 0.02,
        }
    }
}

/// Returns `None` if there isn't yet enough history to classify the
/// regime; callers should treat that as "no opinion" rather than defaulting
/// to any particular regime.
pub fn detect_regime(series: &BarSeries, cfg: &RegimeConfig) -> Option<Regime> {
    let bars = series.as_slice();
    let min_bars = cfg.bb_period.max(cfg.adx_period * 2).max(cfg.returns_lookback as u32 + 1);
    if bars.len() < min_bars as usize {
        return None;
    }

    let adx = functions::adx(bars, cfg.adx_period as usize)?;
    if adx.adx >= cfg.trend_adx_threshold {
        return Some(if adx.di_plus >= adx.di_minus { Regime::TrendingUp } else { Regime::TrendingDown });
    }

    let atr = functions::atr(bars, cfg.atr_period as usize)?;
    let close = bars.last()?.close;
    let atr_pct = if close.abs() > f64::EPSILON { atr / close.abs() } else { 0.0 };

    let window = &bars[bars.len() - cfg.returns_lookback - 1..];
    let returns: Vec<f64> = window.windows(2).map(|w| (w[1].close - w[0].close) / w[0].close.abs().max(1e-12)).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let returns_stdev = variance.sqrt();

    if atr_pct >= cfg.volatile_atr_pct || returns_stdev >= cfg.volatile_returns_stdev {
        return Some(Regime::Volatile);
    }

    let bands = functions::bbands(bars, cfg.bb_period as usize, 2.0)?;
    let bandwidth = if bands.middle.abs() > f64::EPSILON { (bands.upper - bands.lower) / bands.middle.abs() } else { 0.0 };

    if bandwidth <= cfg.consolidating_bandwidth {
        Some(Regime::Consolidating)
    } else {
        Some(Regime::Ranging)
    }
}
