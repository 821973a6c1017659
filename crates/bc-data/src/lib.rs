//! Data Layer (§4.2): normalizes broker bars into the canonical `Bar` type
//! and owns the per-(symbol, timeframe) `BarSeries` cache the rest of the
//! core reads from.

mod cache;

pub use bc_schemas::{Bar, BarSeries, Timeframe};
pub use cache::{BarCache, CacheConfig, DataError, RefreshReport};
