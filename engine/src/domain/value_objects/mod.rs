//! Value objects: immutable domain vocabulary

mod health_check;
mod instance_state;
mod process_def;
mod process_type;
mod restart_policy;
mod stop_signal;

pub use health_check::{HealthCheckConfig, HealthProbe};
pub use instance_state::InstanceState;
pub use process_def::{Hook, HookKind, ProcessDef};
pub use process_type::ProcessType;
pub use restart_policy::RestartPolicy;
pub use stop_signal::StopSignal;
