//! Strategy Layer (§4.4): seven required strategies behind one `Strategy`
//! trait, plus the dynamic regime-based selector and its optional
//! fallback chain.

pub mod regime;
pub mod selector;
pub mod strategies;
pub mod strategy;

pub use regime::{detect_regime, Regime, RegimeConfig};
pub use selector::{DynamicSelector, SelectorConfig, SelectorWeights, TradeOutcome};
pub use strategies::canonical_roster;
pub use strategy::Strategy;
