//! Entry Confluence Gate (§4.5): scores raw strategy signals on level,
//! momentum, timing, and structure, maps the weighted score to a quality
//! tier and size multiplier, and queues marginal signals for a better
//! entry instead of discarding them outright.

pub mod gate;
pub mod queue;

pub use gate::{ConfluenceConfig, ConfluenceGate, ConfluenceWeights, GateAction};
pub use queue::{PendingEntry, PendingEntryQueue, PendingOutcome};
