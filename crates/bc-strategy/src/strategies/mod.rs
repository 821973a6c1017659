//! The seven required strategies (§4.4), each a thin, stateless wrapper
//! around `bc_indicators::functions`.

mod ema_crossover;
mod mean_reversion;
mod momentum_breakout;
mod rsi_reversal;
mod scalping;
mod sma_crossover;
mod trend_following;

pub use ema_crossover::EmaCrossoverStrategy;
pub use mean_reversion::MeanReversionStrategy;
pub use momentum_breakout::MomentumBreakoutStrategy;
pub use rsi_reversal::RsiReversalStrategy;
pub use scalping::ScalpingStrategy;
pub use sma_crossover::SmaCrossoverStrategy;
pub use trend_following::TrendFollowingStrategy;

/// All seven required strategies, boxed as trait objects, in their
/// canonical (alphabetical) order — the order the dynamic selector breaks
/// score ties with (§4.4: "ties broken by lower name-sort order").
pub fn canonical_roster() -> Vec<Box<dyn crate::strategy::Strategy>> {
    vec![
        Box::new(EmaCrossoverStrategy::default()),
        Box::new(MeanReversionStrategy::default()),
        Box::new(MomentumBreakoutStrategy::default()),
        Box::new(RsiReversalStrategy::default()),
        Box::new(ScalpingStrategy::default()),
        Box::new(SmaCrossoverStrategy::default()),
        Box::new(TrendFollowingStrategy::default()),
    ]
}
