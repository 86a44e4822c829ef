//! Domain layer: supervision vocabulary, rules, and ports

pub mod entities;
pub mod error;
pub mod ports;
pub mod services;
pub mod value_objects;

pub use entities::{
    backoff_delay, derive_aggregate, AggregateState, Instance, OneshotExecution, OneshotHistory,
    ScheduleState, TriggerKind,
};
pub use error::{DomainError, Result};
pub use services::{ResourceSample, TimeSeriesBuffer};
pub use value_objects::{
    HealthCheckConfig, HealthProbe, Hook, HookKind, InstanceState, ProcessDef, ProcessType,
    RestartPolicy, StopSignal,
};
