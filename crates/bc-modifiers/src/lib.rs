//! Dynamic Stop Manager (§4.9) and Profit Scaler (§4.10): the two in-flight
//! position modifiers that run once per iteration, ahead of the exit
//! coordinator, and coordinate with it and each other through the per-ticket
//! mutation lease in `bc_schemas`.

pub mod dynamic_stop;
pub mod profit_scaler;

pub use dynamic_stop::{shrink_factor, DynamicStopConfig, DynamicStopManager, StopCandidate};
pub use profit_scaler::{r_to_micro, ProfitScaler, ProfitScalerConfig, ProfitTier, ScalerAction};
