//! The `Strategy` contract (§4.4): `on_bar(latest_bar, series, indicators)
//! -> Option<Signal>`. Strategies are stateless with respect to the loop —
//! they read off the series window handed to them and must not assume
//! iteration contiguity, since a reconnect may skip bars.

use bc_indicators::IndicatorFrame;
use bc_indicators::IndicatorRequirement;
use bc_schemas::{Bar, BarSeries, Signal};

pub trait Strategy: Send {
    /// Stable, sortable name used for selector tie-breaks and metrics
    /// labels, e.g. `"sma_crossover"`.
    fn name(&self) -> &'static str;

    /// The indicator requirements this strategy needs computed every
    /// iteration it is a candidate, contributed to the shared
    /// `IndicatorRequirementResolver`.
    fn required_indicators(&self) -> Vec<IndicatorRequirement>;

    fn on_bar(&self, latest_bar: &Bar, series: &BarSeries, indicators: &IndicatorFrame) -> Option<Signal>;
}

/// Builds an empty-metadata `Signal` from a strategy's raw output, filling
/// in the bookkeeping fields every strategy needs but none should have to
/// repeat.
pub(crate) fn make_signal(
    strategy_name: &str,
    bar: &Bar,
    side: bc_schemas::Side,
    reference_price: f64,
    proposed_sl: f64,
    proposed_tp: f64,
    confidence: f64,
) -> Signal {
    Signal {
        id: uuid::Uuid::new_v4(),
        ts_utc: bar.ts_utc,
        symbol: bar.symbol.clone(),
        timeframe: bar.timeframe,
        side,
        reference_price,
        proposed_sl,
        proposed_tp,
        confidence,
        strategy: strategy_name.to_string(),
        metadata: std::collections::BTreeMap::new(),
    }
}

/// Places SL/TP a multiple of ATR away from `reference` on the correct
/// side, the common case for every strategy below.
pub(crate) fn atr_sl_tp(side: bc_schemas::Side, reference: f64, atr: f64, sl_mult: f64, tp_mult: f64) -> (f64, f64) {
    match side {
        bc_schemas::Side::Long => (reference - atr * sl_mult, reference + atr * tp_mult),
        bc_schemas::Side::Short => (reference + atr * sl_mult, reference - atr * tp_mult),
    }
}
