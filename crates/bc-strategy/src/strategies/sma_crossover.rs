use bc_indicators::{functions, IndicatorFrame, IndicatorRequirement};
use bc_schemas::{Bar, BarSeries, Side, Signal};

use crate::strategy::{atr_sl_tp, make_signal, Strategy};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmaCrossoverStrategy {
    pub fast_period: u32,
    pub slow_period: u32,
    pub atr_period: u32,
    pub sl_atr_mult: f64,
    pub tp_atr_mult: f64,
    pub confidence: f64,
}

impl Default for SmaCrossoverStrategy {
    fn default() -> Self {
        SmaCrossoverStrategy { fast_period: 10, slow_period: 30, atr_period: 14, sl_atr_mult: 1.5, tp_atr_mult: 2.5, confidence: 0.6 }
    }
}

impl Strategy for SmaCrossoverStrategy {
    fn name(&self) -> &'static str {
        "sma_crossover"
    }

    fn required_indicators(&self) -> Vec<IndicatorRequirement> {
        vec![
            IndicatorRequirement::Sma { period: self.fast_period },
            IndicatorRequirement::Sma { period: self.slow_period },
            IndicatorRequirement::Atr { period: self.atr_period },
        ]
    }

    fn on_bar(&self, latest_bar: &Bar, series: &BarSeries, _indicators: &IndicatorFrame) -> Option<Signal> {
        let bars = series.as_slice();
        if bars.len() < self.slow_period as usize + 1 {
            return None;
        }
        let prev = &bars[..bars.len() - 1];

        let fast_now = functions::sma(bars, self.fast_period as usize)?;
        let slow_now = functions::sma(bars, self.slow_period as usize)?;
        let fast_prev = functions::sma(prev, self.fast_period as usize)?;
        let slow_prev = functions::sma(prev, self.slow_period as usize)?;
        let atr = functions::atr(bars, self.atr_period as usize)?;

        let side = if fast_prev <= slow_prev && fast_now > slow_now {
            Side::Long
        } else if fast_prev >= slow_prev && fast_now < slow_now {
            Side::Short
        } else {
            return None;
        };

        let reference = latest_bar.close;
        let (sl, tp) = atr_sl_tp(side, reference, atr, self.sl_atr_mult, self.tp_atr_mult);
        Some(make_signal(self.name(), latest_bar, side, reference, sl, tp, self.confidence))
    }
}
