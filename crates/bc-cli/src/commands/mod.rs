//! Command handler modules for bc-cli.

pub mod config_hash;
pub mod paper_run;

use bc_schemas::Timeframe;

/// Parses a CLI `--timeframe` string (`M1`, `M5`, `M15`, `M30`, `H1`, `H4`,
/// `D1`) into the matching `Timeframe` variant.
pub fn parse_timeframe(raw: &str) -> anyhow::Result<Timeframe> {
    match raw.trim().to_uppercase().as_str() {
        "M1" => Ok(Timeframe::M1),
        "M5" => Ok(Timeframe::M5),
        "M15" => Ok(Timeframe::M15),
        "M30" => Ok(Timeframe::M30),
        "H1" => Ok(Timeframe::H1),
        "H4" => Ok(Timeframe::H4),
        "D1" => Ok(Timeframe::D1),
        other => anyhow::bail!("invalid --timeframe '{other}'. expected one of: M1 | M5 | M15 | M30 | H1 | H4 | D1"),
    }
}
