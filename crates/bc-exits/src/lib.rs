//! Exit Coordinator (§4.8): a priority-ordered list of exit strategies,
//! evaluated with contextual priority adjustment, first match wins. Also
//! home to the weekend/session instrument classification shared with the
//! time-based exit.

pub mod coordinator;
pub mod strategy;

pub use coordinator::{ContextualAdjustment, ExitCoordinator};
pub use strategy::{
    is_24_7_instrument, ExitContext, ExitMemory, ExitStrategy, FlashCrashExit, HardStopLossExit, ProfitTargetExit, TimeBasedExit, TrailingStopExit,
};
