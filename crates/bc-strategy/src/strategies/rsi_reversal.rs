use bc_indicators::{functions, IndicatorFrame, IndicatorRequirement};
use bc_schemas::{Bar, BarSeries, Side, Signal};

use crate::strategy::{atr_sl_tp, make_signal, Strategy};

/// Pure extreme-recovery: RSI crossing back above the oversold line (or
/// below the overbought line) after having been beyond it, with no trend
/// or band filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RsiReversalStrategy {
    pub rsi_period: u32,
    pub oversold: f64,
    pub overbought: f64,
    pub atr_period: u32,
    pub sl_atr_mult: f64,
    pub tp_atr_mult: f64,
    pub confidence: f64,
}

impl Default for RsiReversalStrategy {
    fn default() -> Self {
        RsiReversalStrategy {
            rsi_period: 14,
            oversold: 30.0,
            overbought: 70.0,
            atr_period: 14,
            sl_atr_mult: 1.5,
            tp_atr_mult: 2.0,
            confidence: 0.5,
        }
    }
}

impl Strategy for RsiReversalStrategy {
    fn name(&self) -> &'static str {
        "rsi_reversal"
    }

    fn required_indicators(&self) -> Vec<IndicatorRequirement> {
        vec![IndicatorRequirement::Rsi { period: self.rsi_period }, IndicatorRequirement::Atr { period: self.atr_period }]
    }

    fn on_bar(&self, latest_bar: &Bar, series: &BarSeries, _indicators: &IndicatorFrame) -> Option<Signal> {
        let bars = series.as_slice();
        if bars.len() < self.rsi_period as usize + 2 {
            return None;
        }
        let prev = &bars[..bars.len() - 1];
        let rsi_now = functions::rsi(bars, self.rsi_period as usize)?;
        let rsi_prev = functions::rsi(prev, self.rsi_period as usize)?;
        let atr = functions::atr(bars, self.atr_period as usize)?;
        let close = latest_bar.close;

        let side = if rsi_prev < self.oversold && rsi_now >= self.oversold {
            Side::Long
        } else if rsi_prev > self.overbought && rsi_now <= self.overbought {
            Side::Short
        } else {
            return None;
        };

        let (sl, tp) = atr_sl_tp(side, close, atr, self.sl_atr_mult, self.tp_atr_mult);
        Some(make_signal(self.name(), latest_bar, side, close, sl, tp, self.confidence))
    }
}
