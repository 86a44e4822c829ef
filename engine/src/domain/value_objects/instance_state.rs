//! InstanceState value object
//! Lifecycle state of a single OS child under a managed process

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Created or waiting out a restart backoff, no child attached
    #[default]
    Pending,
    /// Child spawned, readiness not yet established
    Starting,
    /// Child alive and considered healthy
    Running,
    /// Stop requested, waiting for the child to exit
    Stopping,
    /// Stopped on request
    Stopped,
    /// Exited and no further restart will be attempted
    Failed,
    /// Oneshot finished with exit code 0
    Completed,
}

impl InstanceState {
    /// States in which a child process is attached (pid is valid)
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    /// Terminal states: the slot holds no child and never will again
    /// without a fresh start or reconciliation
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed | Self::Completed)
    }

    /// Validate a state transition. Respawn goes through Pending, which is
    /// the only re-entry point after an exit.
    pub fn can_transition_to(&self, next: InstanceState) -> bool {
        use InstanceState::*;

        match (self, next) {
            (Pending, Starting) => true,
            (Pending, Failed) => true, // spawn error with no retry left
            (Pending, Stopped) => true, // stop requested while waiting out backoff

            (Starting, Running) => true,
            (Starting, Stopping) => true,
            (Starting, Pending) => true, // died during startup, restart scheduled
            (Starting, Failed) => true,
            (Starting, Completed) => true, // oneshot that finishes immediately

            (Running, Stopping) => true,
            (Running, Pending) => true, // spontaneous exit, restart scheduled
            (Running, Failed) => true,
            (Running, Completed) => true,

            (Stopping, Stopped) => true,
            (Stopping, Failed) => true,

            (a, b) if *a == b => true,

            _ => false,
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Completed => "completed",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_live() {
        assert!(InstanceState::Starting.is_live());
        assert!(InstanceState::Running.is_live());
        assert!(InstanceState::Stopping.is_live());
        assert!(!InstanceState::Pending.is_live());
        assert!(!InstanceState::Stopped.is_live());
    }

    #[test]
    fn test_is_terminal() {
        assert!(InstanceState::Stopped.is_terminal());
        assert!(InstanceState::Failed.is_terminal());
        assert!(InstanceState::Completed.is_terminal());
        assert!(!InstanceState::Pending.is_terminal());
        assert!(!InstanceState::Running.is_terminal());
    }

    #[test]
    fn test_valid_transitions() {
        assert!(InstanceState::Pending.can_transition_to(InstanceState::Starting));
        assert!(InstanceState::Starting.can_transition_to(InstanceState::Running));
        assert!(InstanceState::Running.can_transition_to(InstanceState::Stopping));
        assert!(InstanceState::Stopping.can_transition_to(InstanceState::Stopped));
        assert!(InstanceState::Running.can_transition_to(InstanceState::Pending));
    }

    #[test]
    fn test_invalid_transitions() {
        // No backward edges except through Pending
        assert!(!InstanceState::Running.can_transition_to(InstanceState::Starting));
        assert!(!InstanceState::Stopped.can_transition_to(InstanceState::Running));
        assert!(!InstanceState::Completed.can_transition_to(InstanceState::Starting));
        assert!(!InstanceState::Pending.can_transition_to(InstanceState::Running));
    }
}
