//! Domain-level errors
//! These represent supervision rule violations, not programmer mistakes

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    // Configuration errors
    #[error("Invalid configuration field '{field}': {reason}")]
    ConfigInvalid { field: String, reason: String },

    // Dependency errors
    #[error("Process '{from}' depends on unknown process '{to}'")]
    DependencyMissing { from: String, to: String },

    #[error("Dependency cycle involving process '{involving}'")]
    DependencyCycle { involving: String },

    // Lifecycle errors
    #[error("Process '{name}' not found")]
    NotFound { name: String },

    #[error("Process '{name}' already exists")]
    AlreadyExists { name: String },

    #[error("Process '{name}' is {current}, operation requires {required}")]
    StateConflict {
        name: String,
        current: String,
        required: String,
    },

    #[error("Failed to spawn '{name}': {cause}")]
    SpawnFailed { name: String, cause: String },

    #[error("Child of '{name}' exited (code {code:?}, signal {signal:?})")]
    ChildExited {
        name: String,
        code: Option<i32>,
        signal: Option<i32>,
    },

    #[error("Process '{name}' is unhealthy")]
    HealthUnhealthy { name: String },

    // Hook errors
    #[error("Hook '{name}' failed: {kind}")]
    HookFailed { name: String, kind: String },

    #[error("Hook '{name}' timed out")]
    HookTimedOut { name: String },

    // Operational errors
    #[error("Operation '{operation}' timed out")]
    Timeout { operation: String },

    #[error("Operation '{operation}' was cancelled")]
    Cancelled { operation: String },

    #[error("Internal error: {cause}")]
    Internal { cause: String },
}

impl DomainError {
    /// Stable machine-readable kind, part of the control-plane contract
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigInvalid { .. } => "config_invalid",
            Self::DependencyMissing { .. } => "dependency_missing",
            Self::DependencyCycle { .. } => "dependency_cycle",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::StateConflict { .. } => "state_conflict",
            Self::SpawnFailed { .. } => "spawn_failed",
            Self::ChildExited { .. } => "child_exited",
            Self::HealthUnhealthy { .. } => "health_unhealthy",
            Self::HookFailed { .. } => "hook_failed",
            Self::HookTimedOut { .. } => "hook_timed_out",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::Internal { .. } => "internal",
        }
    }

    /// The resource this error is about, when there is one
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::ConfigInvalid { field, .. } => Some(field),
            Self::DependencyMissing { from, .. } => Some(from),
            Self::DependencyCycle { involving } => Some(involving),
            Self::NotFound { name }
            | Self::AlreadyExists { name }
            | Self::StateConflict { name, .. }
            | Self::SpawnFailed { name, .. }
            | Self::ChildExited { name, .. }
            | Self::HealthUnhealthy { name }
            | Self::HookFailed { name, .. }
            | Self::HookTimedOut { name } => Some(name),
            Self::Timeout { operation } | Self::Cancelled { operation } => Some(operation),
            Self::Internal { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
