//! Scenario-test support for the trading core: a deterministic driver over
//! `bc_loop::trading_loop::TradingLoop` plus a bar-fixture loader shared
//! across scenario tests.

use anyhow::{Context, Result};
use bc_schemas::{Bar, Timeframe};
use chrono::{DateTime, Utc};

pub mod driver;

pub use driver::Driver;

/// Loads a bar fixture from a CSV with header
/// `ts_utc,open,high,low,close,volume` for a fixed `symbol`/`timeframe`,
/// checked for strictly increasing timestamps (§4.3 "Bar integrity").
pub fn load_bars_csv(path: &str, symbol: &str, timeframe: Timeframe) -> Result<Vec<Bar>> {
    let mut rdr = csv::Reader::from_path(path).with_context(|| format!("open bars csv: {path}"))?;
    let mut out = Vec::new();

    for rec in rdr.records() {
        let rec = rec?;
        let ts: DateTime<Utc> = rec[0].parse().context("parse ts_utc")?;
        out.push(Bar {
            symbol: symbol.into(),
            timeframe,
            ts_utc: ts,
            open: rec[1].parse().context("parse open")?,
            high: rec[2].parse().context("parse high")?,
            low: rec[3].parse().context("parse low")?,
            close: rec[4].parse().context("parse close")?,
            volume: rec[5].parse().context("parse volume")?,
            forming: false,
        });
    }

    for w in out.windows(2) {
        if !(w[0].ts_utc < w[1].ts_utc) {
            anyhow::bail!("bars not strictly increasing");
        }
    }

    Ok(out)
}
