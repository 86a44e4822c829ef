//! Entities: mutable domain records with identity

mod instance;
mod runtime;

pub use instance::{backoff_delay, Instance};
pub use runtime::{
    derive_aggregate, AggregateState, OneshotExecution, OneshotHistory, ScheduleState, TriggerKind,
};
