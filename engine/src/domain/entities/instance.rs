//! Instance entity
//! Mutable record for one OS child of a managed process. Owned by the
//! process controller, mutated only by the instance task that drives it.

use crate::domain::{DomainError, InstanceState, ProcessDef};
use std::time::{Duration, Instant, SystemTime};

/// One slot of a managed process
#[derive(Debug, Clone)]
pub struct Instance {
    process: String,
    slot: u32,
    state: InstanceState,
    pid: Option<u32>,
    started_at: Option<SystemTime>,
    last_exit_at: Option<SystemTime>,
    last_exit_code: Option<i32>,
    last_signal: Option<i32>,
    restart_count: u32,
    consecutive_failures: u32,
    /// Backoff gate: no respawn before this point
    next_restart_not_before: Option<Instant>,
}

impl Instance {
    pub fn new(process: &str, slot: u32) -> Self {
        Self {
            process: process.to_string(),
            slot,
            state: InstanceState::Pending,
            pid: None,
            started_at: None,
            last_exit_at: None,
            last_exit_code: None,
            last_signal: None,
            restart_count: 0,
            consecutive_failures: 0,
            next_restart_not_before: None,
        }
    }

    /// Stable identifier `<process>-<slot>`
    pub fn id(&self) -> String {
        format!("{}-{}", self.process, self.slot)
    }

    pub fn process(&self) -> &str {
        &self.process
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> Option<SystemTime> {
        self.started_at
    }

    pub fn last_exit_at(&self) -> Option<SystemTime> {
        self.last_exit_at
    }

    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_exit_code
    }

    pub fn last_signal(&self) -> Option<i32> {
        self.last_signal
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn next_restart_not_before(&self) -> Option<Instant> {
        self.next_restart_not_before
    }

    fn transition(&mut self, next: InstanceState) -> Result<(), DomainError> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::Internal {
                cause: format!(
                    "invalid transition {} -> {} for {}",
                    self.state,
                    next,
                    self.id()
                ),
            });
        }
        self.state = next;
        // pid is only meaningful while a child is attached
        if !next.is_live() {
            self.pid = None;
        }
        Ok(())
    }

    /// Child spawned: record pid and entry into Starting
    pub fn mark_starting(&mut self, pid: u32) -> Result<(), DomainError> {
        self.transition(InstanceState::Starting)?;
        self.pid = Some(pid);
        self.started_at = Some(SystemTime::now());
        Ok(())
    }

    /// Readiness established (health check success or min-healthy window)
    pub fn mark_running(&mut self) -> Result<(), DomainError> {
        self.transition(InstanceState::Running)
    }

    pub fn mark_stopping(&mut self) -> Result<(), DomainError> {
        self.transition(InstanceState::Stopping)
    }

    pub fn mark_stopped(&mut self) -> Result<(), DomainError> {
        self.record_exit_time();
        self.transition(InstanceState::Stopped)
    }

    pub fn mark_failed(&mut self) -> Result<(), DomainError> {
        self.record_exit_time();
        self.transition(InstanceState::Failed)
    }

    pub fn mark_completed(&mut self, exit_code: i32) -> Result<(), DomainError> {
        self.last_exit_code = Some(exit_code);
        self.record_exit_time();
        self.transition(InstanceState::Completed)
    }

    fn record_exit_time(&mut self) {
        if self.last_exit_at.is_none() || self.pid.is_some() {
            self.last_exit_at = Some(SystemTime::now());
        }
    }

    /// Record a spontaneous exit and arm the backoff gate for a respawn.
    /// Returns the delay the caller must wait before the next spawn.
    pub fn schedule_restart(
        &mut self,
        def: &ProcessDef,
        exit_code: Option<i32>,
        signal: Option<i32>,
        failed: bool,
    ) -> Result<Duration, DomainError> {
        self.last_exit_code = exit_code;
        self.last_signal = signal;
        self.record_exit_time();
        if failed {
            self.consecutive_failures += 1;
        }
        let delay = backoff_delay(def, self.consecutive_failures);
        self.next_restart_not_before = Some(Instant::now() + delay);
        self.restart_count += 1;
        self.transition(InstanceState::Pending)?;
        Ok(delay)
    }

    /// Record a spontaneous exit with no respawn to follow
    pub fn record_final_exit(&mut self, exit_code: Option<i32>, signal: Option<i32>) {
        self.last_exit_code = exit_code;
        self.last_signal = signal;
    }

    /// The child survived its min-healthy window (or passed its first health
    /// check); the failure streak is over.
    pub fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
        self.next_restart_not_before = None;
    }

    /// Replacement record for a controller-driven respawn: same id, fresh
    /// lifecycle, restart counter carried over and bumped.
    pub fn renew(&self) -> Instance {
        let mut fresh = Instance::new(&self.process, self.slot);
        fresh.restart_count = self.restart_count + 1;
        fresh
    }
}

/// Exponential backoff: `delay × factor^failures`, capped.
/// Zero failures yields the base delay.
pub fn backoff_delay(def: &ProcessDef, consecutive_failures: u32) -> Duration {
    let base = def.restart_delay_seconds as f64;
    let factor = def.restart_backoff_factor.max(1.0);
    let exp = consecutive_failures.min(32);
    let delay = base * factor.powi(exp as i32);
    let capped = delay.min(def.restart_backoff_max_seconds as f64);
    Duration::from_secs_f64(capped.max(0.0))
}
