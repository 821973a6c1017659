//! Typed validation layer over the merged config JSON (§6 "Configuration
//! surface"). `#[serde(deny_unknown_fields)]` at every nested level is the
//! mechanical enforcement of "unknown options are rejected at startup" —
//! a typo'd or stale key fails to parse instead of being silently ignored.
//!
//! This is a representative subset of the surface (engine identity, risk
//! ceilings, the paper broker's instrument model, and the adoption policy),
//! not a mirror of every runtime module's own config struct — those stay
//! constructed from their own defaults today. `parse_core_config` exists so
//! callers can validate a config stack before acting on it.

use anyhow::{Context, Result};
use bc_schemas::Timeframe;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    pub engine: EngineSection,
    #[serde(default)]
    pub risk: RiskSection,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub adoption: AdoptionSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    pub symbol: String,
    pub timeframe: Timeframe,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RiskSection {
    pub daily_loss_limit: f64,
    pub drawdown_halt_pct: f64,
    pub max_positions_per_symbol: u32,
}

impl Default for RiskSection {
    fn default() -> Self {
        RiskSection { daily_loss_limit: 0.02, drawdown_halt_pct: 0.20, max_positions_per_symbol: 1 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BrokerSection {
    pub spread_points: f64,
    pub starting_balance: f64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        BrokerSection { spread_points: 1.5, starting_balance: 10_000.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AdoptionSection {
    pub max_age_hours: f64,
    pub apply_default_sltp: bool,
}

impl Default for AdoptionSection {
    fn default() -> Self {
        AdoptionSection { max_age_hours: 72.0, apply_default_sltp: true }
    }
}

/// Deserializes a merged config JSON into the closed `CoreConfig` schema,
/// rejecting any key the schema doesn't know about at any nested level.
pub fn parse_core_config(config_json: &Value) -> Result<CoreConfig> {
    serde_json::from_value(config_json.clone()).context("config failed closed-schema validation")
}
