//! The per-(symbol, timeframe) `BarSeries` cache (§4.2).
//!
//! Normalizes whatever the broker hands back into the canonical `Bar`, keeps
//! one rolling window per (symbol, timeframe), and knows the difference
//! between an incremental top-up and a reconnect that invalidates everything
//! it has cached so far.

use std::collections::BTreeMap;

use bc_broker::{BrokerAdapter, BrokerError};
use bc_schemas::{BarSeries, Timeframe};

/// Bounds how much history the cache keeps and how much it insists on
/// having before a series is considered usable by a strategy.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Bars retained per (symbol, timeframe); also the amount requested
    /// from the broker on a full refill.
    pub capacity: usize,
    /// Minimum bars a series needs before it is considered ready. The
    /// cache never blocks waiting for this — it just flags the shortfall.
    pub lookback_bars: usize,
    /// Bars requested on an incremental top-up (small: just the bars that
    /// may have formed since the last iteration).
    pub incremental_fetch: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: 1000,
            lookback_bars: 200,
            incremental_fetch: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataError {
    Broker(BrokerError),
    /// The broker returned fewer usable bars than `lookback_bars` requires.
    InsufficientHistory { symbol: String, timeframe: Timeframe, have: usize, need: usize },
}

impl std::fmt::Display for DataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataError::Broker(e) => write!(f, "{e}"),
            DataError::InsufficientHistory { symbol, timeframe, have, need } => {
                write!(f, "insufficient history for {symbol} {timeframe:?}: have {have}, need {need}")
            }
        }
    }
}

impl std::error::Error for DataError {}

impl From<BrokerError> for DataError {
    fn from(e: BrokerError) -> Self {
        DataError::Broker(e)
    }
}

/// Outcome of one `BarCache::refresh` call, for callers that want to log or
/// expose cache health without re-deriving it from the series itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub fetched: usize,
    pub accepted: usize,
    pub rejected_insane: usize,
    pub rejected_non_monotonic: usize,
    pub was_full_refill: bool,
}

/// Owns one `BarSeries` per (symbol, timeframe) and knows how to keep it in
/// sync with a `BrokerAdapter`.
pub struct BarCache {
    config: CacheConfig,
    series: BTreeMap<(String, Timeframe), BarSeries>,
}

impl BarCache {
    pub fn new(config: CacheConfig) -> Self {
        BarCache { config, series: BTreeMap::new() }
    }

    pub fn get(&self, symbol: &str, timeframe: Timeframe) -> Option<&BarSeries> {
        self.series.get(&(symbol.to_string(), timeframe))
    }

    pub fn is_ready(&self, symbol: &str, timeframe: Timeframe) -> bool {
        self.get(symbol, timeframe).map_or(false, |s| s.len() >= self.config.lookback_bars.min(s.capacity()))
    }

    /// Drops every cached series. Called once, right after a reconnect is
    /// observed, before the next `refresh` refills from scratch.
    pub fn invalidate_all(&mut self) {
        self.series.clear();
    }

    pub fn invalidate(&mut self, symbol: &str, timeframe: Timeframe) {
        self.series.remove(&(symbol.to_string(), timeframe));
    }

    /// Brings the (symbol, timeframe) series up to date. `full_refill`
    /// forces a drop-and-refetch of `capacity` bars (post-reconnect);
    /// otherwise only `incremental_fetch` recent bars are requested and
    /// merged in.
    pub fn refresh(
        &mut self,
        broker: &dyn BrokerAdapter,
        symbol: &str,
        timeframe: Timeframe,
        full_refill: bool,
        timeout_ms: u64,
    ) -> Result<RefreshReport, DataError> {
        let key = (symbol.to_string(), timeframe);
        if full_refill {
            self.series.remove(&key);
        }

        let want = if full_refill || !self.series.contains_key(&key) {
            self.config.capacity
        } else {
            self.config.incremental_fetch
        };

        let fetched = broker.get_bars(symbol, timeframe, want, timeout_ms)?;
        let fetched_count = fetched.len();

        let series = self.series.entry(key).or_insert_with(|| BarSeries::new(self.config.capacity));

        let mut rejected_insane = 0usize;
        let mut rejected_non_monotonic = 0usize;
        let mut accepted = 0usize;
        for bar in fetched {
            if !bar.is_sane() {
                rejected_insane += 1;
                tracing::warn!(symbol, ?timeframe, "dropping non-finite/inverted bar from broker feed");
                continue;
            }
            if series.push(bar) {
                accepted += 1;
            } else {
                rejected_non_monotonic += 1;
                tracing::warn!(symbol, ?timeframe, "dropping non-monotonic bar from broker feed");
            }
        }

        // Only a full refill tells us how much history actually exists
        // upstream; an incremental top-up only ever adds a handful of bars
        // and says nothing about total availability.
        if full_refill {
            let have = series.len();
            let need = self.config.lookback_bars.min(fetched_count);
            if have < need {
                return Err(DataError::InsufficientHistory { symbol: symbol.to_string(), timeframe, have, need });
            }
        }

        Ok(RefreshReport { fetched: fetched_count, accepted, rejected_insane, rejected_non_monotonic, was_full_refill: full_refill })
    }
}
