//! The indicator engine (§4.3): computes a resolved requirement set exactly
//! once per iteration and attaches the results to the working series under
//! canonical column names, with friendly aliases for the newest bar.

use std::collections::BTreeMap;

use bc_schemas::{BarSeries, IndicatorValue};

use crate::functions;
use crate::requirement::IndicatorRequirement;

#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorError {
    /// A required indicator could not be computed because the series does
    /// not yet hold enough history. Per §4.3 this aborts the signal stage
    /// for the iteration rather than raising.
    InsufficientHistory { column: String, required: usize, available: usize },
    /// Two computations for the same canonical column disagreed — the
    /// engine refuses to silently overwrite an existing value.
    ColumnConflict { column: String },
}

impl std::fmt::Display for IndicatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndicatorError::InsufficientHistory { column, required, available } => write!(
                f,
                "indicator '{column}' needs {required} bars, series has {available}"
            ),
            IndicatorError::ColumnConflict { column } => {
                write!(f, "indicator column '{column}' computed twice with different values")
            }
        }
    }
}

impl std::error::Error for IndicatorError {}

/// The newest bar's resolved indicator values: canonical columns plus
/// family aliases (`rsi`, `atr`, `adx`, ...).
#[derive(Debug, Clone, Default)]
pub struct IndicatorFrame {
    columns: BTreeMap<String, IndicatorValue>,
    aliases: BTreeMap<&'static str, String>,
}

impl IndicatorFrame {
    fn insert(&mut self, column: String, value: IndicatorValue) -> Result<(), IndicatorError> {
        if let Some(existing) = self.columns.get(&column) {
            if *existing != value {
                return Err(IndicatorError::ColumnConflict { column });
            }
            return Ok(());
        }
        self.columns.insert(column, value);
        Ok(())
    }

    pub fn get(&self, column: &str) -> Option<&IndicatorValue> {
        self.columns.get(column)
    }

    /// Look up by friendly alias (`rsi`, `atr`, `adx`, ...).
    pub fn alias(&self, family: &str) -> Option<&IndicatorValue> {
        self.aliases.get(family).and_then(|col| self.columns.get(col))
    }

    pub fn scalar(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(IndicatorValue::as_scalar)
    }

    pub fn columns(&self) -> &BTreeMap<String, IndicatorValue> {
        &self.columns
    }
}

#[derive(Debug, Default)]
pub struct IndicatorEngine;

impl IndicatorEngine {
    pub fn new() -> Self {
        IndicatorEngine
    }

    /// Computes every requirement exactly once and attaches each result
    /// under its canonical column name, plus the resolved aliases. Returns
    /// `Err` on the *first* requirement whose history is insufficient —
    /// callers must treat this as "abort the signal stage for this
    /// iteration", not as a fatal error.
    pub fn compute(
        &self,
        series: &BarSeries,
        requirements: &[IndicatorRequirement],
        aliases: &[(&'static str, IndicatorRequirement)],
    ) -> Result<IndicatorFrame, IndicatorError> {
        let bars = series.as_slice();
        let mut frame = IndicatorFrame::default();

        for req in requirements {
            let column = req.column_name();
            if bars.len() < req.min_bars() {
                return Err(IndicatorError::InsufficientHistory {
                    column,
                    required: req.min_bars(),
                    available: bars.len(),
                });
            }
            let value = compute_one(bars, req).ok_or_else(|| IndicatorError::InsufficientHistory {
                column: column.clone(),
                required: req.min_bars(),
                available: bars.len(),
            })?;
            frame.insert(column, value)?;
        }

        for (family, req) in aliases {
            frame.aliases.insert(family, req.column_name());
        }

        Ok(frame)
    }
}

fn vector(pairs: &[(&str, f64)]) -> IndicatorValue {
    IndicatorValue::Vector(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect())
}

fn compute_one(bars: &[bc_schemas::Bar], req: &IndicatorRequirement) -> Option<IndicatorValue> {
    match *req {
        IndicatorRequirement::Rsi { period } => functions::rsi(bars, period as usize).map(IndicatorValue::Scalar),
        IndicatorRequirement::Atr { period } => functions::atr(bars, period as usize).map(IndicatorValue::Scalar),
        IndicatorRequirement::Adx { period } => functions::adx(bars, period as usize)
            .map(|a| vector(&[("adx", a.adx), ("di_plus", a.di_plus), ("di_minus", a.di_minus)])),
        IndicatorRequirement::Macd { fast, slow, signal } => {
            functions::macd(bars, fast as usize, slow as usize, signal as usize)
                .map(|m| vector(&[("macd", m.macd), ("signal", m.signal), ("hist", m.hist)]))
        }
        IndicatorRequirement::Bbands { period, mult_centi } => {
            functions::bbands(bars, period as usize, mult_centi as f64 / 100.0)
                .map(|b| vector(&[("upper", b.upper), ("middle", b.middle), ("lower", b.lower)]))
        }
        IndicatorRequirement::Stochastic { k_period, d_period } => {
            functions::stochastic(bars, k_period as usize, d_period as usize)
                .map(|s| vector(&[("k", s.k), ("d", s.d)]))
        }
        IndicatorRequirement::Supertrend { period, mult_centi } => {
            functions::supertrend(bars, period as usize, mult_centi as f64 / 100.0)
                .map(|s| vector(&[("value", s.value), ("dir", s.dir as f64)]))
        }
        IndicatorRequirement::Vwap => functions::vwap(bars).map(IndicatorValue::Scalar),
        IndicatorRequirement::Sma { period } => functions::sma(bars, period as usize).map(IndicatorValue::Scalar),
        IndicatorRequirement::Ema { period } => functions::ema(bars, period as usize).map(IndicatorValue::Scalar),
    }
}
