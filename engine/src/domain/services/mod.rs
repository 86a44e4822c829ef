//! Domain services: stateless supervision logic

pub mod dependency_graph;
pub mod hook_executor;
pub mod reload_diff;
mod timeseries;

pub use hook_executor::{HookContext, HookError};
pub use reload_diff::{compute_plan, ReloadPlan};
pub use timeseries::{ResourceSample, TimeSeriesBuffer};
