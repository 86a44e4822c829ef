//! Application layer: the supervision engine itself

pub mod health_monitor;
pub mod instance_controller;
pub mod process_controller;
pub mod reload_watcher;
pub mod resource_sampler;
pub mod scheduler;

pub use instance_controller::{HealthSnapshot, InstanceCommand, RestartReason};
pub use process_controller::{InstanceSnapshot, ProcessController, ProcessSnapshot};
pub use resource_sampler::ResourceSampler;
pub use scheduler::SupervisionScheduler;
