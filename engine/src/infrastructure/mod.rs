//! Infrastructure layer: OS, filesystem, and wire-facing implementations

pub mod config;
pub mod log_collector;
pub mod metrics;
pub mod probes;
pub mod sysinfo_reader;
pub mod unix_spawner;

pub use log_collector::{LogCollector, LogLine};
pub use sysinfo_reader::SysinfoReader;
pub use unix_spawner::UnixProcessSpawner;
