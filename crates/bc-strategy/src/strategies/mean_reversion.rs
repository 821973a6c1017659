use bc_indicators::{functions, IndicatorFrame, IndicatorRequirement};
use bc_schemas::{Bar, BarSeries, Side, Signal};

use crate::strategy::{atr_sl_tp, make_signal, Strategy};

/// Bollinger Band extremes confirmed by RSI extremes: price outside a band
/// with RSI agreeing it is overextended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeanReversionStrategy {
    pub bb_period: u32,
    pub bb_mult_centi: u32,
    pub rsi_period: u32,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub atr_period: u32,
    pub sl_atr_mult: f64,
    pub tp_atr_mult: f64,
    pub confidence: f64,
}

impl Default for MeanReversionStrategy {
    fn default() -> Self {
        MeanReversionStrategy {
            bb_period: 20,
            bb_mult_centi: 200,
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            atr_period: 14,
            sl_atr_mult: 1.2,
            tp_atr_mult: 2.0,
            confidence: 0.58,
        }
    }
}

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &'static str {
        "mean_reversion"
    }

    fn required_indicators(&self) -> Vec<IndicatorRequirement> {
        vec![
            IndicatorRequirement::Bbands { period: self.bb_period, mult_centi: self.bb_mult_centi },
            IndicatorRequirement::Rsi { period: self.rsi_period },
            IndicatorRequirement::Atr { period: self.atr_period },
        ]
    }

    fn on_bar(&self, latest_bar: &Bar, series: &BarSeries, _indicators: &IndicatorFrame) -> Option<Signal> {
        let bars = series.as_slice();
        if bars.len() < self.bb_period.max(self.rsi_period) as usize + 1 {
            return None;
        }
        let bands = functions::bbands(bars, self.bb_period as usize, self.bb_mult_centi as f64 / 100.0)?;
        let rsi = functions::rsi(bars, self.rsi_period as usize)?;
        let atr = functions::atr(bars, self.atr_period as usize)?;
        let close = latest_bar.close;

        let side = if close < bands.lower && rsi < self.rsi_oversold {
            Side::Long
        } else if close > bands.upper && rsi > self.rsi_overbought {
            Side::Short
        } else {
            return None;
        };

        // Reversion target is the band midline, not a fixed ATR multiple.
        let tp = bands.middle;
        let (sl, _) = atr_sl_tp(side, close, atr, self.sl_atr_mult, self.tp_atr_mult);
        Some(make_signal(self.name(), latest_bar, side, close, sl, tp, self.confidence))
    }
}
