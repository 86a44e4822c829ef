//! ProcessDef value object
//! The immutable declarative definition of one managed process. Replaced
//! atomically (behind an `Arc`) on reload, never mutated in place.

use crate::constants::{hook as hook_defaults, process as defaults};
use crate::domain::{DomainError, HealthCheckConfig, ProcessType, RestartPolicy, StopSignal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// An auxiliary external command tied to a process lifecycle point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    pub name: String,

    /// Argv tokens, first token resolved via PATH when not absolute
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// 0 falls back to the 30 s default
    #[serde(default)]
    pub timeout_seconds: u64,

    /// Additional attempts after the first failure
    #[serde(default)]
    pub retry: u32,

    #[serde(default)]
    pub retry_delay_seconds: u64,

    /// When set, a failed hook reports success to its caller; the outcome
    /// still reaches metrics and logs
    #[serde(default)]
    pub continue_on_error: bool,
}

impl Hook {
    /// Effective deadline for one attempt
    pub fn effective_timeout_seconds(&self) -> u64 {
        if self.timeout_seconds == 0 {
            hook_defaults::DEFAULT_TIMEOUT_SEC
        } else {
            self.timeout_seconds
        }
    }
}

/// Lifecycle point a hook sequence is attached to. Used for metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    PreStart,
    PostStop,
    PreStop,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreStart => "pre_start",
            Self::PostStop => "post_stop",
            Self::PreStop => "pre_stop",
        }
    }
}

/// Declarative definition of one managed process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDef {
    /// Unique identifier, non-empty, no whitespace. In the config file the
    /// name is the map key; it is filled in after parsing and not written
    /// back on save.
    #[serde(default, skip_serializing)]
    pub name: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default, rename = "type")]
    pub process_type: ProcessType,

    /// Argv tokens, non-empty
    pub command: Vec<String>,

    /// Merged over the manager's environment at spawn time
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Name or numeric id, resolved at spawn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Desired instance count; forced to 1 for oneshot/scheduled
    #[serde(default = "default_scale")]
    pub scale: u32,

    /// Lower starts earlier when dependencies tie
    #[serde(default)]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,

    #[serde(default)]
    pub restart: RestartPolicy,

    #[serde(default = "default_restart_delay")]
    pub restart_delay_seconds: u64,

    #[serde(default = "default_backoff_max")]
    pub restart_backoff_max_seconds: u64,

    #[serde(default = "default_backoff_factor")]
    pub restart_backoff_factor: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_start: Vec<Hook>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_stop: Vec<Hook>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_stop: Vec<Hook>,

    #[serde(default)]
    pub stop_signal: StopSignal,

    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: u64,
}

fn default_enabled() -> bool {
    true
}
fn default_scale() -> u32 {
    1
}
fn default_restart_delay() -> u64 {
    defaults::DEFAULT_RESTART_DELAY_SEC
}
fn default_backoff_max() -> u64 {
    defaults::DEFAULT_RESTART_BACKOFF_MAX_SEC
}
fn default_backoff_factor() -> f64 {
    defaults::DEFAULT_RESTART_BACKOFF_FACTOR
}
fn default_stop_timeout() -> u64 {
    defaults::DEFAULT_STOP_TIMEOUT_SEC
}

impl ProcessDef {
    /// A definition with library defaults for everything but name and argv
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            process_type: ProcessType::Longrun,
            command,
            env: BTreeMap::new(),
            working_dir: None,
            user: None,
            group: None,
            scale: 1,
            priority: 0,
            depends_on: BTreeSet::new(),
            restart: RestartPolicy::Always,
            restart_delay_seconds: default_restart_delay(),
            restart_backoff_max_seconds: default_backoff_max(),
            restart_backoff_factor: default_backoff_factor(),
            health_check: None,
            pre_start: Vec::new(),
            post_stop: Vec::new(),
            pre_stop: Vec::new(),
            stop_signal: StopSignal::default(),
            stop_timeout_seconds: default_stop_timeout(),
        }
    }

    /// Validate the definition in isolation (dependency targets are checked
    /// against the full map by the dependency graph).
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(DomainError::ConfigInvalid {
                field: format!("{}.name", self.name),
                reason: "process name must be non-empty without whitespace".to_string(),
            });
        }
        if self.command.is_empty() || self.command[0].is_empty() {
            return Err(DomainError::ConfigInvalid {
                field: format!("{}.command", self.name),
                reason: "command must have at least one argv token".to_string(),
            });
        }
        if self.scale == 0 {
            return Err(DomainError::ConfigInvalid {
                field: format!("{}.scale", self.name),
                reason: "scale must be at least 1".to_string(),
            });
        }
        if self.restart_backoff_factor < 1.0 {
            return Err(DomainError::ConfigInvalid {
                field: format!("{}.restart_backoff_factor", self.name),
                reason: "backoff factor must be >= 1.0".to_string(),
            });
        }
        for hook in self
            .pre_start
            .iter()
            .chain(&self.post_stop)
            .chain(&self.pre_stop)
        {
            if hook.command.is_empty() {
                return Err(DomainError::ConfigInvalid {
                    field: format!("{}.hooks.{}", self.name, hook.name),
                    reason: "hook command must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Effective desired scale: oneshot and scheduled processes run exactly
    /// one instance regardless of the declared value.
    pub fn effective_scale(&self) -> u32 {
        if self.process_type.forces_single_instance() {
            1
        } else {
            self.scale
        }
    }

    /// Hook sequence for a lifecycle point
    pub fn hooks(&self, kind: HookKind) -> &[Hook] {
        match kind {
            HookKind::PreStart => &self.pre_start,
            HookKind::PostStop => &self.post_stop,
            HookKind::PreStop => &self.pre_stop,
        }
    }

    /// True when a change between two definitions requires replacing the
    /// running children: the fields baked into a spawned process.
    pub fn requires_restart(&self, other: &ProcessDef) -> bool {
        self.command != other.command
            || self.env != other.env
            || self.working_dir != other.working_dir
            || self.user != other.user
            || self.group != other.group
            || self.health_check != other.health_check
            || self.restart != other.restart
            || self.process_type != other.process_type
            || self.stop_signal != other.stop_signal
    }

    #[cfg(test)]
    pub fn test_def(name: &str, command: &[&str]) -> Self {
        Self::new(name, command.iter().map(|s| s.to_string()).collect())
    }
}
