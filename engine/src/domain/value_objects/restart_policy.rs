//! Restart policy for managed processes

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

impl RestartPolicy {
    /// Check if a spontaneous exit with this status warrants a restart
    pub fn should_restart(&self, exit_code: Option<i32>, signal: Option<i32>) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::OnFailure => exit_code != Some(0) || signal.is_some(),
        }
    }
}

impl std::str::FromStr for RestartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "on-failure" | "onfailure" => Ok(Self::OnFailure),
            "never" => Ok(Self::Never),
            _ => Err(format!("Invalid restart policy: {}", s)),
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Always => "always",
            Self::OnFailure => "on-failure",
            Self::Never => "never",
        };
        write!(f, "{}", s)
    }
}
