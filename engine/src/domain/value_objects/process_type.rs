//! ProcessType value object

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a process is expected to behave over its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
    /// Stays up indefinitely, restarted per policy
    #[default]
    Longrun,
    /// Runs to completion once
    Oneshot,
    /// Runs oneshot-style executions on an external trigger
    Scheduled,
}

impl ProcessType {
    /// Oneshot and scheduled processes always run a single instance
    pub fn forces_single_instance(&self) -> bool {
        matches!(self, Self::Oneshot | Self::Scheduled)
    }
}

impl std::str::FromStr for ProcessType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "longrun" => Ok(Self::Longrun),
            "oneshot" => Ok(Self::Oneshot),
            "scheduled" => Ok(Self::Scheduled),
            _ => Err(format!("Invalid process type: {}", s)),
        }
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Longrun => "longrun",
            Self::Oneshot => "oneshot",
            Self::Scheduled => "scheduled",
        };
        write!(f, "{}", s)
    }
}
