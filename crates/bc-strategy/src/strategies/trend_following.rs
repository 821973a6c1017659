use bc_indicators::{functions, IndicatorFrame, IndicatorRequirement};
use bc_schemas::{Bar, BarSeries, Side, Signal};

use crate::strategy::{atr_sl_tp, make_signal, Strategy};

/// ADX-gated: only signals while `adx >= adx_threshold` confirms a genuine
/// trend, direction from `DI+`/`DI-` and price vs. a trend EMA.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendFollowingStrategy {
    pub adx_period: u32,
    pub adx_threshold: f64,
    pub ema_period: u32,
    pub atr_period: u32,
    pub sl_atr_mult: f64,
    pub tp_atr_mult: f64,
    pub confidence_base: f64,
}

impl Default for TrendFollowingStrategy {
    fn default() -> Self {
        TrendFollowingStrategy {
            adx_period: 14,
            adx_threshold: 25.0,
            ema_period: 50,
            atr_period: 14,
            sl_atr_mult: 2.0,
            tp_atr_mult: 4.0,
            confidence_base: 0.6,
        }
    }
}

impl Strategy for TrendFollowingStrategy {
    fn name(&self) -> &'static str {
        "trend_following"
    }

    fn required_indicators(&self) -> Vec<IndicatorRequirement> {
        vec![
            IndicatorRequirement::Adx { period: self.adx_period },
            IndicatorRequirement::Ema { period: self.ema_period },
            IndicatorRequirement::Atr { period: self.atr_period },
        ]
    }

    fn on_bar(&self, latest_bar: &Bar, series: &BarSeries, _indicators: &IndicatorFrame) -> Option<Signal> {
        let bars = series.as_slice();
        if bars.len() < self.ema_period.max(self.adx_period * 2) as usize + 1 {
            return None;
        }
        let adx = functions::adx(bars, self.adx_period as usize)?;
        if adx.adx < self.adx_threshold {
            return None;
        }
        let ema = functions::ema(bars, self.ema_period as usize)?;
        let atr = functions::atr(bars, self.atr_period as usize)?;
        let close = latest_bar.close;

        let side = if adx.di_plus > adx.di_minus && close > ema {
            Side::Long
        } else if adx.di_minus > adx.di_plus && close < ema {
            Side::Short
        } else {
            return None;
        };

        // Stronger trend (higher ADX above threshold) raises confidence.
        let confidence = (self.confidence_base + (adx.adx - self.adx_threshold) / 200.0).min(0.95);
        let (sl, tp) = atr_sl_tp(side, close, atr, self.sl_atr_mult, self.tp_atr_mult);
        Some(make_signal(self.name(), latest_bar, side, close, sl, tp, confidence))
    }
}
