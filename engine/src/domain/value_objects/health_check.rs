//! Health check configuration
//! Probes are a tagged union with one `probe` operation, implemented by the
//! infrastructure layer. No runtime hierarchy over check kinds.

use crate::constants::health_check as defaults;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What to probe. The variant is the check kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HealthProbe {
    /// Open a connection to `host:port` and close it immediately
    Tcp { host: String, port: u16 },
    /// GET the url; success iff the status is in the expected set
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        expected_status: Vec<u16>,
    },
    /// Run an argv; success iff exit code 0
    Exec { command: Vec<String> },
}

impl HealthProbe {
    /// Label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tcp { .. } => "tcp",
            Self::Http { .. } => "http",
            Self::Exec { .. } => "exec",
        }
    }

    /// Whether an HTTP status counts as success for this probe
    pub fn http_status_ok(&self, status: u16) -> bool {
        match self {
            Self::Http { expected_status, .. } if !expected_status.is_empty() => {
                expected_status.contains(&status)
            }
            // Default expected set is 2xx
            Self::Http { .. } => (200..300).contains(&status),
            _ => false,
        }
    }
}

impl fmt::Display for HealthProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Self::Http { url, .. } => write!(f, "http {}", url),
            Self::Exec { command } => write!(f, "exec {}", command.join(" ")),
        }
    }
}

/// Full health check configuration for one process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(flatten)]
    pub probe: HealthProbe,

    /// Seconds between probes
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,

    /// Deadline for a single probe
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Consecutive successes before the process is marked healthy
    #[serde(default = "default_healthy")]
    pub healthy_threshold: u32,

    /// Consecutive failures before the process is marked unhealthy
    #[serde(default = "default_unhealthy")]
    pub unhealthy_threshold: u32,

    /// Seconds after start during which probing is suspended
    #[serde(default = "default_grace")]
    pub grace_period_seconds: u64,
}

fn default_interval() -> u64 {
    defaults::DEFAULT_INTERVAL_SEC
}
fn default_timeout() -> u64 {
    defaults::DEFAULT_TIMEOUT_SEC
}
fn default_healthy() -> u32 {
    defaults::DEFAULT_HEALTHY_THRESHOLD
}
fn default_unhealthy() -> u32 {
    defaults::DEFAULT_UNHEALTHY_THRESHOLD
}
fn default_grace() -> u64 {
    defaults::DEFAULT_GRACE_PERIOD_SEC
}
