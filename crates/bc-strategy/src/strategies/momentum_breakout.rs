use bc_indicators::{functions, IndicatorFrame, IndicatorRequirement};
use bc_schemas::{Bar, BarSeries, Side, Signal};

use crate::strategy::{atr_sl_tp, make_signal, Strategy};

/// Breaks out above/below the highest-high or lowest-low of the last
/// `lookback` bars (excluding the current one) by more than
/// `breakout_atr_mult * ATR`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentumBreakoutStrategy {
    pub lookback: usize,
    pub atr_period: u32,
    pub breakout_atr_mult: f64,
    pub sl_atr_mult: f64,
    pub tp_atr_mult: f64,
    pub confidence: f64,
}

impl Default for MomentumBreakoutStrategy {
    fn default() -> Self {
        MomentumBreakoutStrategy {
            lookback: 20,
            atr_period: 14,
            breakout_atr_mult: 0.25,
            sl_atr_mult: 1.5,
            tp_atr_mult: 3.0,
            confidence: 0.65,
        }
    }
}

impl Strategy for MomentumBreakoutStrategy {
    fn name(&self) -> &'static str {
        "momentum_breakout"
    }

    fn required_indicators(&self) -> Vec<IndicatorRequirement> {
        vec![IndicatorRequirement::Atr { period: self.atr_period }]
    }

    fn on_bar(&self, latest_bar: &Bar, series: &BarSeries, _indicators: &IndicatorFrame) -> Option<Signal> {
        let bars = series.as_slice();
        if bars.len() < self.lookback + 2 {
            return None;
        }
        let window = &bars[bars.len() - self.lookback - 1..bars.len() - 1];
        let highest_high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lowest_low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let atr = functions::atr(bars, self.atr_period as usize)?;
        let buffer = atr * self.breakout_atr_mult;

        let close = latest_bar.close;
        let side = if close > highest_high + buffer {
            Side::Long
        } else if close < lowest_low - buffer {
            Side::Short
        } else {
            return None;
        };

        let (sl, tp) = atr_sl_tp(side, close, atr, self.sl_atr_mult, self.tp_atr_mult);
        Some(make_signal(self.name(), latest_bar, side, close, sl, tp, self.confidence))
    }
}
