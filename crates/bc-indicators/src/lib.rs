//! The indicator engine (§4.3): a registry of pure, composable indicator
//! functions plus requirement resolution and a per-iteration compute pass
//! that attaches results to the working bar series under canonical column
//! names and friendly aliases.

pub mod engine;
pub mod functions;
pub mod requirement;

pub use engine::{IndicatorEngine, IndicatorError, IndicatorFrame};
pub use requirement::{IndicatorRequirement, IndicatorRequirementResolver};
