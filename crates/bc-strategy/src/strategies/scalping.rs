use bc_indicators::{functions, IndicatorFrame, IndicatorRequirement};
use bc_schemas::{Bar, BarSeries, Side, Signal, Timeframe};

use crate::strategy::{atr_sl_tp, make_signal, Strategy};

/// EMA trend filter plus an RSI momentum-resumption trigger, restricted to
/// tight timeframes (§4.4: "scalping (EMA+RSI on tight timeframe)").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalpingStrategy {
    pub ema_period: u32,
    pub rsi_period: u32,
    pub rsi_pullback_level: f64,
    pub atr_period: u32,
    pub sl_atr_mult: f64,
    pub tp_atr_mult: f64,
    pub confidence: f64,
}

impl Default for ScalpingStrategy {
    fn default() -> Self {
        ScalpingStrategy {
            ema_period: 20,
            rsi_period: 7,
            rsi_pullback_level: 50.0,
            atr_period: 14,
            sl_atr_mult: 1.0,
            tp_atr_mult: 1.5,
            confidence: 0.55,
        }
    }
}

fn is_tight_timeframe(tf: Timeframe) -> bool {
    matches!(tf, Timeframe::M1 | Timeframe::M5)
}

impl Strategy for ScalpingStrategy {
    fn name(&self) -> &'static str {
        "scalping"
    }

    fn required_indicators(&self) -> Vec<IndicatorRequirement> {
        vec![
            IndicatorRequirement::Ema { period: self.ema_period },
            IndicatorRequirement::Rsi { period: self.rsi_period },
            IndicatorRequirement::Atr { period: self.atr_period },
        ]
    }

    fn on_bar(&self, latest_bar: &Bar, series: &BarSeries, _indicators: &IndicatorFrame) -> Option<Signal> {
        if !is_tight_timeframe(latest_bar.timeframe) {
            return None;
        }
        let bars = series.as_slice();
        if bars.len() < self.ema_period.max(self.rsi_period) as usize + 2 {
            return None;
        }
        let prev = &bars[..bars.len() - 1];

        let ema_now = functions::ema(bars, self.ema_period as usize)?;
        let rsi_now = functions::rsi(bars, self.rsi_period as usize)?;
        let rsi_prev = functions::rsi(prev, self.rsi_period as usize)?;
        let atr = functions::atr(bars, self.atr_period as usize)?;
        let close = latest_bar.close;

        let side = if close > ema_now && rsi_prev < self.rsi_pullback_level && rsi_now >= self.rsi_pullback_level {
            Side::Long
        } else if close < ema_now && rsi_prev > self.rsi_pullback_level && rsi_now <= self.rsi_pullback_level {
            Side::Short
        } else {
            return None;
        };

        let (sl, tp) = atr_sl_tp(side, close, atr, self.sl_atr_mult, self.tp_atr_mult);
        Some(make_signal(self.name(), latest_bar, side, close, sl, tp, self.confidence))
    }
}
