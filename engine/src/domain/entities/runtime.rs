//! Aggregate runtime state and oneshot execution history

use crate::constants::ONESHOT_HISTORY_CAPACITY;
use crate::domain::InstanceState;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Process-level state derived from the instances' states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateState {
    /// All desired slots running
    Running,
    /// Some slots running, some not
    Degraded,
    /// No live slots
    Stopped,
    /// Ramping up
    Starting,
    /// Draining
    Stopping,
    /// Every slot reached a failed terminal state
    Failed,
    /// Oneshot finished successfully
    Completed,
}

impl fmt::Display for AggregateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
            Self::Completed => "completed",
        };
        write!(f, "{}", s)
    }
}

/// Derive the aggregate from the instance states and the desired scale
pub fn derive_aggregate(states: &[InstanceState], desired: u32) -> AggregateState {
    use InstanceState::*;

    if states.is_empty() {
        return AggregateState::Stopped;
    }
    let running = states.iter().filter(|s| **s == Running).count();
    if states.iter().any(|s| *s == Stopping) {
        return AggregateState::Stopping;
    }
    if running as u32 >= desired && desired > 0 {
        return AggregateState::Running;
    }
    if states.iter().any(|s| matches!(s, Starting | Pending)) {
        if running > 0 {
            return AggregateState::Degraded;
        }
        return AggregateState::Starting;
    }
    if running > 0 {
        return AggregateState::Degraded;
    }
    if states.iter().all(|s| *s == Completed) {
        return AggregateState::Completed;
    }
    if states.iter().all(|s| matches!(s, Failed | Completed)) {
        return AggregateState::Failed;
    }
    AggregateState::Stopped
}

/// Scheduled processes: whether a trigger is currently admissible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleState {
    #[default]
    Idle,
    Executing,
    Paused,
}

impl fmt::Display for ScheduleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Executing => "executing",
            Self::Paused => "paused",
        };
        write!(f, "{}", s)
    }
}

/// What caused a oneshot-style execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Manual,
    Schedule,
    Dependency,
}

/// Historical record of one oneshot-style execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneshotExecution {
    pub id: Uuid,
    pub process: String,
    pub instance_id: String,
    pub trigger: TriggerKind,
    pub started_at: SystemTime,
    pub finished_at: Option<SystemTime>,
    pub duration: Option<Duration>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
}

impl OneshotExecution {
    pub fn begin(process: &str, instance_id: &str, trigger: TriggerKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            process: process.to_string(),
            instance_id: instance_id.to_string(),
            trigger,
            started_at: SystemTime::now(),
            finished_at: None,
            duration: None,
            exit_code: None,
            error_message: None,
        }
    }

    pub fn finish(&mut self, exit_code: Option<i32>, error_message: Option<String>) {
        let now = SystemTime::now();
        self.duration = now.duration_since(self.started_at).ok();
        self.finished_at = Some(now);
        self.exit_code = exit_code;
        self.error_message = error_message;
    }
}

/// Bounded FIFO of oneshot executions, newest last
#[derive(Debug)]
pub struct OneshotHistory {
    capacity: usize,
    records: VecDeque<OneshotExecution>,
}

impl OneshotHistory {
    pub fn new() -> Self {
        Self::with_capacity(ONESHOT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            records: VecDeque::new(),
        }
    }

    pub fn push(&mut self, record: OneshotExecution) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Most recent records first, up to `limit` (0 means all retained)
    pub fn recent(&self, limit: usize) -> Vec<OneshotExecution> {
        let take = if limit == 0 { self.records.len() } else { limit };
        self.records.iter().rev().take(take).cloned().collect()
    }

    /// Most recent records of one process, newest first
    pub fn recent_for(&self, process: &str, limit: usize) -> Vec<OneshotExecution> {
        let take = if limit == 0 { self.records.len() } else { limit };
        self.records
            .iter()
            .rev()
            .filter(|r| r.process == process)
            .take(take)
            .cloned()
            .collect()
    }

    /// Drop records for a process that no longer exists
    pub fn forget_process(&mut self, process: &str) {
        self.records.retain(|r| r.process != process);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for OneshotHistory {
    fn default() -> Self {
        Self::new()
    }
}
