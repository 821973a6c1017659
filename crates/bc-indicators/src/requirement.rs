//! Indicator requirement resolution (§4.3 `IndicatorRequirementResolver`).
//!
//! A requirement names an indicator family and its parameters. The resolver
//! collects requirements from the active strategy, the dynamic-selector
//! candidates, and configuration, and deduplicates them into a single set
//! computed exactly once per iteration.

use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndicatorRequirement {
    Rsi { period: u32 },
    Atr { period: u32 },
    Adx { period: u32 },
    Macd { fast: u32, slow: u32, signal: u32 },
    /// `mult_centi` is the band multiplier * 100, kept integral for Eq/Ord/Hash.
    Bbands { period: u32, mult_centi: u32 },
    Stochastic { k_period: u32, d_period: u32 },
    Supertrend { period: u32, mult_centi: u32 },
    Vwap,
    Sma { period: u32 },
    Ema { period: u32 },
}

impl IndicatorRequirement {
    /// Family name used for both the canonical column prefix and the
    /// friendly-alias lookup (`rsi`, `atr`, `adx`, ...).
    pub fn family(&self) -> &'static str {
        match self {
            IndicatorRequirement::Rsi { .. } => "rsi",
            IndicatorRequirement::Atr { .. } => "atr",
            IndicatorRequirement::Adx { .. } => "adx",
            IndicatorRequirement::Macd { .. } => "macd",
            IndicatorRequirement::Bbands { .. } => "bbands",
            IndicatorRequirement::Stochastic { .. } => "stoch",
            IndicatorRequirement::Supertrend { .. } => "supertrend",
            IndicatorRequirement::Vwap => "vwap",
            IndicatorRequirement::Sma { .. } => "sma",
            IndicatorRequirement::Ema { .. } => "ema",
        }
    }

    /// The parameter signature appended to `family` to build the canonical
    /// column name, e.g. `rsi_14`, `macd_12_26_9`, `bbands_20_200`.
    pub fn param_signature(&self) -> String {
        match self {
            IndicatorRequirement::Rsi { period } => period.to_string(),
            IndicatorRequirement::Atr { period } => period.to_string(),
            IndicatorRequirement::Adx { period } => period.to_string(),
            IndicatorRequirement::Macd { fast, slow, signal } => format!("{fast}_{slow}_{signal}"),
            IndicatorRequirement::Bbands { period, mult_centi } => format!("{period}_{mult_centi}"),
            IndicatorRequirement::Stochastic { k_period, d_period } => format!("{k_period}_{d_period}"),
            IndicatorRequirement::Supertrend { period, mult_centi } => format!("{period}_{mult_centi}"),
            IndicatorRequirement::Vwap => String::new(),
            IndicatorRequirement::Sma { period } => period.to_string(),
            IndicatorRequirement::Ema { period } => period.to_string(),
        }
    }

    pub fn column_name(&self) -> String {
        bc_schemas::indicator_column_name(self.family(), &self.param_signature())
    }

    /// The minimum number of bars needed before this requirement can be
    /// computed at all.
    pub fn min_bars(&self) -> usize {
        match self {
            IndicatorRequirement::Rsi { period } => *period as usize + 1,
            IndicatorRequirement::Atr { period } => *period as usize + 1,
            IndicatorRequirement::Adx { period } => *period as usize * 2,
            IndicatorRequirement::Macd { slow, signal, .. } => *slow as usize + *signal as usize,
            IndicatorRequirement::Bbands { period, .. } => *period as usize,
            IndicatorRequirement::Stochastic { k_period, d_period } => *k_period as usize + *d_period as usize,
            IndicatorRequirement::Supertrend { period, .. } => *period as usize + 1,
            IndicatorRequirement::Vwap => 1,
            IndicatorRequirement::Sma { period } => *period as usize,
            IndicatorRequirement::Ema { period } => *period as usize,
        }
    }
}

/// Deduplicates requirements gathered from multiple sources (active
/// strategy, dynamic-selector candidates, configuration) into one ordered
/// set. The first occurrence of each indicator family is recorded as the
/// "primary" requirement for that family's friendly alias (`rsi`, `atr`,
/// `adx`); later requirements for the same family with different
/// parameters still get their own canonical column but do not change the
/// alias.
#[derive(Debug, Default)]
pub struct IndicatorRequirementResolver {
    all: BTreeSet<IndicatorRequirement>,
    primary_by_family: Vec<(&'static str, IndicatorRequirement)>,
}

impl IndicatorRequirementResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, req: IndicatorRequirement) -> &mut Self {
        let family = req.family();
        if !self.primary_by_family.iter().any(|(f, _)| *f == family) {
            self.primary_by_family.push((family, req.clone()));
        }
        self.all.insert(req);
        self
    }

    pub fn extend(&mut self, reqs: impl IntoIterator<Item = IndicatorRequirement>) -> &mut Self {
        for r in reqs {
            self.add(r);
        }
        self
    }

    pub fn resolved(&self) -> Vec<IndicatorRequirement> {
        self.all.iter().cloned().collect()
    }

    pub fn aliases(&self) -> Vec<(&'static str, IndicatorRequirement)> {
        self.primary_by_family.clone()
    }
}
