//! phpeek-pm engine
//!
//! Supervision core for a fleet of declaratively configured child
//! processes:
//! - Per-process controllers with scale reconciliation
//! - Dependency-ordered startup and shutdown
//! - Restart policies with exponential backoff
//! - TCP/HTTP/exec health checks driving targeted restarts
//! - Lifecycle hooks with timeout and retry
//! - Resource sampling into per-instance time series and Prometheus gauges
//! - An HTTP control plane served over TCP and a local socket

pub mod constants;

// Core architecture modules
pub mod adapters;
pub mod application;
pub mod domain;
pub mod infrastructure;

// Re-export the surface the daemon and the e2e tests drive
pub use application::{ProcessSnapshot, ResourceSampler, SupervisionScheduler};
pub use domain::{
    AggregateState, DomainError, HealthCheckConfig, HealthProbe, Hook, InstanceState, ProcessDef,
    ProcessType, RestartPolicy, StopSignal, TriggerKind,
};
pub use infrastructure::{LogCollector, SysinfoReader, UnixProcessSpawner};
