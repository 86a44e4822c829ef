//! Process controller
//! Owns every slot of one managed process. Reconciliation is the only path
//! that allocates or retires slots: lowest free slot first on the way up,
//! highest occupied slot first on the way down. Lifecycle operations are
//! serialized per process by an async mutex; the slot table itself lives
//! behind a plain mutex that is never held across an await.

use crate::application::instance_controller::{
    run_instance, HealthSnapshot, InstanceCommand, InstanceContext, RestartReason,
};
use crate::domain::ports::{OutputSink, ProcessSpawner};
use crate::domain::services::hook_executor::{self, HookContext};
use crate::domain::{
    derive_aggregate, AggregateState, DomainError, HookKind, Instance, InstanceState,
    OneshotExecution, ProcessDef, ProcessType, ScheduleState, TriggerKind,
};
use crate::infrastructure::metrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Slot {
    cell: Arc<Mutex<Instance>>,
    cmd_tx: mpsc::Sender<InstanceCommand>,
    task: JoinHandle<()>,
}

struct ControllerState {
    desired_scale: u32,
    schedule_state: ScheduleState,
    slots: BTreeMap<u32, Slot>,
}

/// Serializable view of one instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub id: String,
    pub slot: u32,
    pub state: InstanceState,
    pub pid: Option<u32>,
    pub started_at: Option<u64>,
    pub last_exit_at: Option<u64>,
    pub last_exit_code: Option<i32>,
    pub last_signal: Option<i32>,
    pub restart_count: u32,
    pub consecutive_failures: u32,
}

/// Serializable view of one process
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub name: String,
    pub state: AggregateState,
    pub schedule_state: Option<ScheduleState>,
    pub desired_scale: u32,
    pub instances: Vec<InstanceSnapshot>,
}

fn unix_secs(t: Option<SystemTime>) -> Option<u64> {
    t.and_then(|t| t.duration_since(UNIX_EPOCH).ok()).map(|d| d.as_secs())
}

pub struct ProcessController {
    name: String,
    def_tx: watch::Sender<Arc<ProcessDef>>,
    state: Mutex<ControllerState>,
    /// Serializes start/stop/restart/scale/trigger
    op_lock: tokio::sync::Mutex<()>,
    aggregate_tx: watch::Sender<AggregateState>,
    health_tx: watch::Sender<HealthSnapshot>,
    changed_tx: mpsc::UnboundedSender<()>,
    changed_notify: Arc<Notify>,
    spawner: Arc<dyn ProcessSpawner>,
    sink: Arc<dyn OutputSink>,
    exec_tx: mpsc::UnboundedSender<OneshotExecution>,
    cancel: CancellationToken,
}

impl ProcessController {
    pub fn new(
        def: Arc<ProcessDef>,
        spawner: Arc<dyn ProcessSpawner>,
        sink: Arc<dyn OutputSink>,
        exec_tx: mpsc::UnboundedSender<OneshotExecution>,
    ) -> Arc<Self> {
        let name = def.name.clone();
        let desired_scale = def.effective_scale();
        let (def_tx, _) = watch::channel(def);
        let (aggregate_tx, _) = watch::channel(AggregateState::Stopped);
        let (health_tx, _) = watch::channel(HealthSnapshot::default());
        let (changed_tx, changed_rx) = mpsc::unbounded_channel();
        let changed_notify = Arc::new(Notify::new());

        let controller = Arc::new(Self {
            name,
            def_tx,
            state: Mutex::new(ControllerState {
                desired_scale,
                schedule_state: ScheduleState::Idle,
                slots: BTreeMap::new(),
            }),
            op_lock: tokio::sync::Mutex::new(()),
            aggregate_tx,
            health_tx,
            changed_tx,
            changed_notify,
            spawner,
            sink,
            exec_tx,
            cancel: CancellationToken::new(),
        });

        let aggregator = controller.clone();
        tokio::spawn(aggregator.run_aggregator(changed_rx));
        controller
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn def(&self) -> Arc<ProcessDef> {
        self.def_tx.borrow().clone()
    }

    pub fn aggregate(&self) -> AggregateState {
        *self.aggregate_tx.borrow()
    }

    pub fn subscribe_aggregate(&self) -> watch::Receiver<AggregateState> {
        self.aggregate_tx.subscribe()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<HealthSnapshot> {
        self.health_tx.subscribe()
    }

    /// Published by the health monitor; starting instances gate on it
    pub fn publish_health(&self, snapshot: HealthSnapshot) {
        let _ = self.health_tx.send(snapshot);
    }

    pub fn subscribe_def(&self) -> watch::Receiver<Arc<ProcessDef>> {
        self.def_tx.subscribe()
    }

    /// Swap the definition without touching instances. New children pick the
    /// definition up on their next spawn.
    pub fn replace_def(&self, def: Arc<ProcessDef>) {
        let _ = self.def_tx.send(def);
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ControllerState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    fn poke(&self) {
        let _ = self.changed_tx.send(());
    }

    /// Derives the aggregate after every instance state change and wakes
    /// the waiters
    async fn run_aggregator(self: Arc<Self>, mut changed_rx: mpsc::UnboundedReceiver<()>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = changed_rx.recv() => {
                    if event.is_none() {
                        break;
                    }
                    // Collapse bursts of changes into one recompute
                    while changed_rx.try_recv().is_ok() {}
                    self.recompute();
                }
            }
        }
    }

    fn recompute(&self) {
        let (aggregate, desired, actual) = self.with_state(|state| {
            let states: Vec<InstanceState> = state
                .slots
                .values()
                .map(|s| s.cell.lock().unwrap_or_else(|e| e.into_inner()).state())
                .collect();
            let actual = states.iter().filter(|s| s.is_live()).count() as u32;
            (
                derive_aggregate(&states, state.desired_scale),
                state.desired_scale,
                actual,
            )
        });
        metrics::set_scale(&self.name, desired, actual);
        let _ = self.aggregate_tx.send(aggregate);
        self.changed_notify.notify_waiters();
    }

    /// Wait until the slot table satisfies `pred`
    async fn wait_until(
        &self,
        cancel: &CancellationToken,
        operation: &str,
        pred: impl Fn(&mut ControllerState) -> bool,
    ) -> Result<(), DomainError> {
        loop {
            let notified = self.changed_notify.notified();
            tokio::pin!(notified);
            // Register for wakeups before checking, so a change landing
            // between the check and the await is not lost
            notified.as_mut().enable();
            if self.with_state(&pred) {
                return Ok(());
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => {
                    return Err(DomainError::Cancelled {
                        operation: format!("{} {}", operation, self.name),
                    });
                }
            }
        }
    }

    fn spawn_slot_locked(&self, state: &mut ControllerState, slot: u32, trigger: TriggerKind) {
        let cell = Arc::new(Mutex::new(Instance::new(&self.name, slot)));
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let ctx = InstanceContext {
            process: self.name.clone(),
            slot,
            trigger,
            def_rx: self.def_tx.subscribe(),
            cell: cell.clone(),
            cmd_rx,
            spawner: self.spawner.clone(),
            sink: self.sink.clone(),
            changed_tx: self.changed_tx.clone(),
            health_rx: self.health_tx.subscribe(),
            exec_tx: self.exec_tx.clone(),
        };
        let task = tokio::spawn(run_instance(ctx));
        state.slots.insert(slot, Slot { cell, cmd_tx, task });
        debug!(process = %self.name, slot, "Slot allocated");
    }

    fn occupied_slots(state: &ControllerState) -> Vec<u32> {
        state
            .slots
            .iter()
            .filter(|(_, s)| !s.cell.lock().unwrap_or_else(|e| e.into_inner()).state().is_terminal())
            .map(|(slot, _)| *slot)
            .collect()
    }

    fn send_command(state: &ControllerState, slot: u32, cmd: InstanceCommand) {
        if let Some(s) = state.slots.get(&slot) {
            // Mailboxes are small; a full one already has a stop/restart
            // queued, so a dropped duplicate is harmless
            let _ = s.cmd_tx.try_send(cmd);
        }
    }

    /// Start the process: pre_start hooks once, then allocate every slot and
    /// block until the aggregate is running (longrun) or the run finished
    /// (oneshot). Scheduled processes only arm their trigger state.
    pub async fn start(
        &self,
        trigger: TriggerKind,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        let _guard = self.op_lock.lock().await;
        let def = self.def();

        if def.process_type == ProcessType::Scheduled {
            self.with_state(|state| state.schedule_state = ScheduleState::Idle);
            info!(process = %self.name, "Scheduled process armed");
            return Ok(());
        }

        let occupied = self.with_state(|state| Self::occupied_slots(state));
        if !occupied.is_empty() {
            return Err(DomainError::StateConflict {
                name: self.name.clone(),
                current: self.aggregate().to_string(),
                required: "stopped".to_string(),
            });
        }

        // Once per start invocation; individual slots added later by
        // scale-up do not re-run the sequence
        hook_executor::execute_sequence(
            &def.pre_start,
            HookKind::PreStart,
            &HookContext {
                process: self.name.clone(),
            },
            cancel,
        )
        .await?;

        let desired = self.with_state(|state| {
            state.slots.clear();
            state.desired_scale = def.effective_scale();
            for slot in 0..state.desired_scale {
                self.spawn_slot_locked(state, slot, trigger);
            }
            state.desired_scale
        });
        self.poke();
        info!(process = %self.name, desired, "Start issued");

        match def.process_type {
            ProcessType::Longrun => self.wait_running(cancel).await,
            _ => self.wait_finished(cancel).await,
        }
    }

    /// Block until the slot table settles: every slot running, or no slot
    /// able to get there anymore. A slot waiting out a restart backoff is
    /// still in flight, so a crash-looping process keeps the caller
    /// blocked until cancelled.
    async fn wait_running(&self, cancel: &CancellationToken) -> Result<(), DomainError> {
        self.wait_until(cancel, "start", |state| {
            let mut all_running = !state.slots.is_empty();
            let mut any_in_flight = false;
            for s in state.slots.values() {
                match s.cell.lock().unwrap_or_else(|e| e.into_inner()).state() {
                    InstanceState::Running => {}
                    InstanceState::Pending | InstanceState::Starting | InstanceState::Stopping => {
                        any_in_flight = true;
                        all_running = false;
                    }
                    _ => all_running = false,
                }
            }
            all_running || !any_in_flight
        })
        .await?;

        let all_running = self.with_state(|state| {
            !state.slots.is_empty()
                && state.slots.values().all(|s| {
                    s.cell.lock().unwrap_or_else(|e| e.into_inner()).state()
                        == InstanceState::Running
                })
        });
        if all_running {
            Ok(())
        } else {
            Err(DomainError::SpawnFailed {
                name: self.name.clone(),
                cause: "process failed during startup".to_string(),
            })
        }
    }

    /// Wait for a oneshot-style run to settle; completion is success
    async fn wait_finished(&self, cancel: &CancellationToken) -> Result<(), DomainError> {
        self.wait_until(cancel, "start", |state| {
            state.slots.values().all(|s| {
                s.cell
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .state()
                    .is_terminal()
            })
        })
        .await?;
        // Judge from the slot records, not the aggregate; the aggregator
        // task may not have caught up with a fast exit yet
        let failed = self.with_state(|state| {
            state.slots.values().find_map(|s| {
                let cell = s.cell.lock().unwrap_or_else(|e| e.into_inner());
                (cell.state() == InstanceState::Failed)
                    .then(|| (cell.last_exit_code(), cell.last_signal()))
            })
        });
        match failed {
            None => Ok(()),
            Some((code, signal)) => Err(DomainError::ChildExited {
                name: self.name.clone(),
                code,
                signal,
            }),
        }
    }

    /// Stop every live slot: pre_stop hooks, stop commands, wait for the
    /// drain, then post_stop hooks. post_stop fires only here, on a full
    /// stop, never on scale-down.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<(), DomainError> {
        let _guard = self.op_lock.lock().await;
        let def = self.def();

        let occupied = self.with_state(|state| Self::occupied_slots(state));
        if occupied.is_empty() {
            return Err(DomainError::StateConflict {
                name: self.name.clone(),
                current: self.aggregate().to_string(),
                required: "running".to_string(),
            });
        }

        let hook_ctx = HookContext {
            process: self.name.clone(),
        };
        hook_executor::execute_sequence(&def.pre_stop, HookKind::PreStop, &hook_ctx, cancel).await?;

        self.with_state(|state| {
            for slot in occupied.iter().rev() {
                Self::send_command(state, *slot, InstanceCommand::Stop);
            }
        });
        info!(process = %self.name, slots = occupied.len(), "Stop issued");

        self.wait_until(cancel, "stop", |state| {
            state.slots.values().all(|s| {
                s.cell
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .state()
                    .is_terminal()
            })
        })
        .await?;

        self.with_state(|state| {
            if state.schedule_state == ScheduleState::Executing {
                state.schedule_state = ScheduleState::Idle;
            }
        });

        hook_executor::execute_sequence(&def.post_stop, HookKind::PostStop, &hook_ctx, cancel)
            .await?;
        info!(process = %self.name, "Stopped");
        Ok(())
    }

    /// Restart live slots in place; a stopped (or completed oneshot)
    /// process is started fresh instead.
    pub async fn restart(&self, cancel: &CancellationToken) -> Result<(), DomainError> {
        {
            let _guard = self.op_lock.lock().await;
            let occupied = self.with_state(|state| Self::occupied_slots(state));
            if !occupied.is_empty() {
                for slot in occupied {
                    self.restart_slot_and_wait(slot, RestartReason::Manual, cancel)
                        .await?;
                }
                return Ok(());
            }
        }
        // Fresh start outside the guard; start() takes the lock itself
        self.start(TriggerKind::Manual, cancel).await
    }

    /// Rolling restart for reload: one slot at a time, each back to running
    /// before the next goes down
    pub async fn rolling_restart(&self, cancel: &CancellationToken) -> Result<(), DomainError> {
        let _guard = self.op_lock.lock().await;
        let occupied = self.with_state(|state| Self::occupied_slots(state));
        for slot in occupied {
            self.restart_slot_and_wait(slot, RestartReason::Reload, cancel)
                .await?;
        }
        Ok(())
    }

    async fn restart_slot_and_wait(
        &self,
        slot: u32,
        reason: RestartReason,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        let before = self.with_state(|state| {
            let generation = state
                .slots
                .get(&slot)
                .map(|s| s.cell.lock().unwrap_or_else(|e| e.into_inner()).restart_count());
            Self::send_command(state, slot, InstanceCommand::Restart(reason));
            generation
        });
        let Some(before) = before else {
            return Ok(());
        };
        self.wait_until(cancel, "restart", move |state| {
            state
                .slots
                .get(&slot)
                .map(|s| {
                    let cell = s.cell.lock().unwrap_or_else(|e| e.into_inner());
                    cell.restart_count() > before
                        && matches!(
                            cell.state(),
                            InstanceState::Running
                                | InstanceState::Completed
                                | InstanceState::Failed
                                | InstanceState::Stopped
                        )
                })
                .unwrap_or(true)
            })
        .await
    }

    /// Ask one slot to restart without waiting; used by the health monitor
    pub fn request_restart(&self, slot: u32, reason: RestartReason) {
        self.with_state(|state| {
            Self::send_command(state, slot, InstanceCommand::Restart(reason));
        });
    }

    /// Reconcile the slot count to `n`. Idempotent; returns once converged.
    /// A fully stopped process only records the new desired scale.
    pub async fn set_desired_scale(
        &self,
        n: u32,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        if n == 0 {
            return Err(DomainError::ConfigInvalid {
                field: format!("{}.scale", self.name),
                reason: "scale must be at least 1".to_string(),
            });
        }
        let def = self.def();
        if def.process_type.forces_single_instance() && n != 1 {
            return Err(DomainError::ConfigInvalid {
                field: format!("{}.scale", self.name),
                reason: format!("{} processes run a single instance", def.process_type),
            });
        }

        let _guard = self.op_lock.lock().await;
        let occupied = self.with_state(|state| {
            state.desired_scale = n;
            Self::occupied_slots(state)
        });
        self.poke();

        if occupied.is_empty() {
            info!(process = %self.name, desired = n, "Scale recorded on stopped process");
            return Ok(());
        }

        let live = occupied.len() as u32;
        if live < n {
            self.with_state(|state| {
                for slot in 0..n {
                    let is_occupied = state
                        .slots
                        .get(&slot)
                        .map(|s| !s.cell.lock().unwrap_or_else(|e| e.into_inner()).state().is_terminal())
                        .unwrap_or(false);
                    if !is_occupied {
                        // The pre_start sequence already ran when the
                        // process came up; scale-up slots skip it
                        self.spawn_slot_locked(state, slot, TriggerKind::Manual);
                    }
                }
            });
            info!(process = %self.name, from = live, to = n, "Scaling up");
        } else if live > n {
            let retire: Vec<u32> = occupied.iter().rev().take((live - n) as usize).copied().collect();
            self.with_state(|state| {
                for slot in &retire {
                    Self::send_command(state, *slot, InstanceCommand::Stop);
                }
            });
            info!(process = %self.name, from = live, to = n, slots = ?retire, "Scaling down");
        }

        self.wait_until(cancel, "scale", move |state| {
            let mut converged = true;
            for (slot, s) in &state.slots {
                let cell_state = s.cell.lock().unwrap_or_else(|e| e.into_inner()).state();
                if *slot < n {
                    converged &= cell_state == InstanceState::Running;
                } else {
                    converged &= cell_state.is_terminal();
                }
            }
            converged
        })
        .await?;

        // Retired slots disappear so the table stays dense [0, desired)
        self.with_state(|state| {
            state.slots.retain(|slot, _| *slot < n);
        });
        self.poke();
        Ok(())
    }

    /// `set_desired_scale(current + delta)` with the floor at one instance
    pub async fn adjust_scale(
        &self,
        delta: i64,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        let current = self.with_state(|state| state.desired_scale) as i64;
        let next = current + delta;
        if next < 1 {
            return Err(DomainError::ConfigInvalid {
                field: format!("{}.scale", self.name),
                reason: format!("scale adjustment {} would drop below 1", delta),
            });
        }
        self.set_desired_scale(next as u32, cancel).await
    }

    /// Run one oneshot-style execution of a scheduled process
    pub async fn trigger(
        &self,
        kind: TriggerKind,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        let def = self.def();
        if def.process_type != ProcessType::Scheduled {
            return Err(DomainError::StateConflict {
                name: self.name.clone(),
                current: def.process_type.to_string(),
                required: "scheduled".to_string(),
            });
        }

        // The admissibility gate flips to Executing atomically so a
        // concurrent trigger is rejected immediately, not queued
        self.with_state(|state| match state.schedule_state {
            ScheduleState::Paused => Err(DomainError::StateConflict {
                name: self.name.clone(),
                current: "paused".to_string(),
                required: "idle".to_string(),
            }),
            ScheduleState::Executing => Err(DomainError::StateConflict {
                name: self.name.clone(),
                current: "executing".to_string(),
                required: "idle".to_string(),
            }),
            ScheduleState::Idle => {
                state.schedule_state = ScheduleState::Executing;
                Ok(())
            }
        })?;

        {
            let _guard = self.op_lock.lock().await;
            self.with_state(|state| {
                state.slots.clear();
                state.desired_scale = 1;
                self.spawn_slot_locked(state, 0, kind);
            });
        }
        self.poke();
        info!(process = %self.name, trigger = ?kind, "Scheduled execution started");

        // Not holding the op lock here lets a stop interrupt the execution
        let result = self.wait_finished(cancel).await;
        self.with_state(|state| {
            if state.schedule_state == ScheduleState::Executing {
                state.schedule_state = ScheduleState::Idle;
            }
        });
        self.poke();
        result
    }

    /// Block further triggers
    pub fn pause(&self) -> Result<(), DomainError> {
        if self.def().process_type != ProcessType::Scheduled {
            return Err(DomainError::StateConflict {
                name: self.name.clone(),
                current: self.def().process_type.to_string(),
                required: "scheduled".to_string(),
            });
        }
        self.with_state(|state| state.schedule_state = ScheduleState::Paused);
        Ok(())
    }

    /// Allow triggers again
    pub fn resume(&self) -> Result<(), DomainError> {
        if self.def().process_type != ProcessType::Scheduled {
            return Err(DomainError::StateConflict {
                name: self.name.clone(),
                current: self.def().process_type.to_string(),
                required: "scheduled".to_string(),
            });
        }
        self.with_state(|state| {
            if state.schedule_state == ScheduleState::Paused {
                state.schedule_state = ScheduleState::Idle;
            }
        });
        Ok(())
    }

    /// Live pids by instance id, for the resource sampler
    pub fn live_pids(&self) -> Vec<(String, u32)> {
        self.with_state(|state| {
            state
                .slots
                .values()
                .filter_map(|s| {
                    let cell = s.cell.lock().unwrap_or_else(|e| e.into_inner());
                    cell.pid().map(|pid| (cell.id(), pid))
                })
                .collect()
        })
    }

    /// Slot states with failure streaks, for the health monitor
    pub fn instance_health_view(&self) -> Vec<(u32, InstanceState, u32)> {
        self.with_state(|state| {
            state
                .slots
                .iter()
                .map(|(slot, s)| {
                    let cell = s.cell.lock().unwrap_or_else(|e| e.into_inner());
                    (*slot, cell.state(), cell.consecutive_failures())
                })
                .collect()
        })
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        let def = self.def();
        self.with_state(|state| {
            let instances = state
                .slots
                .values()
                .map(|s| {
                    let cell = s.cell.lock().unwrap_or_else(|e| e.into_inner());
                    InstanceSnapshot {
                        id: cell.id(),
                        slot: cell.slot(),
                        state: cell.state(),
                        pid: cell.pid(),
                        started_at: unix_secs(cell.started_at()),
                        last_exit_at: unix_secs(cell.last_exit_at()),
                        last_exit_code: cell.last_exit_code(),
                        last_signal: cell.last_signal(),
                        restart_count: cell.restart_count(),
                        consecutive_failures: cell.consecutive_failures(),
                    }
                })
                .collect();
            let states: Vec<InstanceState> = state
                .slots
                .values()
                .map(|s| s.cell.lock().unwrap_or_else(|e| e.into_inner()).state())
                .collect();
            ProcessSnapshot {
                name: self.name.clone(),
                state: derive_aggregate(&states, state.desired_scale),
                schedule_state: (def.process_type == ProcessType::Scheduled)
                    .then_some(state.schedule_state),
                desired_scale: state.desired_scale,
                instances,
            }
        })
    }

    /// Tear the controller down after its process left the config. Slots
    /// must already be stopped; leftover tasks are aborted.
    pub fn close(&self) {
        self.cancel.cancel();
        self.with_state(|state| {
            for (slot, s) in &state.slots {
                if !s.task.is_finished() {
                    warn!(process = %self.name, slot, "Aborting leftover instance task");
                    s.task.abort();
                }
            }
            state.slots.clear();
        });
        metrics::forget_process(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ExitStatus, MockSpawner, NullSink};
    use std::time::Duration;

    struct Rig {
        controller: Arc<ProcessController>,
        spawner: MockSpawner,
        exec_rx: mpsc::UnboundedReceiver<OneshotExecution>,
        cancel: CancellationToken,
    }

    fn rig(def: ProcessDef) -> Rig {
        let spawner = MockSpawner::new();
        let (exec_tx, exec_rx) = mpsc::unbounded_channel();
        let controller = ProcessController::new(
            Arc::new(def),
            Arc::new(spawner.clone()),
            Arc::new(NullSink),
            exec_tx,
        );
        Rig {
            controller,
            spawner,
            exec_rx,
            cancel: CancellationToken::new(),
        }
    }

    fn longrun(name: &str, scale: u32) -> ProcessDef {
        let mut def = ProcessDef::test_def(name, &["/bin/sleep", "60"]);
        def.scale = scale;
        def.restart_delay_seconds = 0;
        def.stop_timeout_seconds = 1;
        def
    }

    /// Drive `expect` fake children to exit once they receive the stop signal
    async fn drive_stops(spawner: &MockSpawner, stop_signal: i32, expect: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let mut delivered = 0;
        while delivered < expect {
            let signalled: Vec<u32> = spawner
                .signals()
                .iter()
                .filter(|(_, sig)| *sig == stop_signal)
                .map(|(pid, _)| *pid)
                .collect();
            let live = spawner.live_pids();
            for pid in signalled {
                if live.contains(&pid) {
                    spawner.exit(pid, ExitStatus { code: None, signal: Some(stop_signal) });
                    delivered += 1;
                }
            }
            if delivered >= expect {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {} stop signals, saw {}",
                expect,
                delivered
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_reaches_running_with_all_slots() {
        let rig = rig(longrun("web", 3));
        rig.controller
            .start(TriggerKind::Manual, &rig.cancel)
            .await
            .unwrap();
        assert_eq!(rig.controller.aggregate(), AggregateState::Running);
        assert_eq!(rig.spawner.live_pids().len(), 3);

        let snapshot = rig.controller.snapshot();
        let slots: Vec<u32> = snapshot.instances.iter().map(|i| i.slot).collect();
        assert_eq!(slots, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_conflicts() {
        let rig = rig(longrun("web", 1));
        rig.controller
            .start(TriggerKind::Manual, &rig.cancel)
            .await
            .unwrap();
        let err = rig
            .controller
            .start(TriggerKind::Manual, &rig.cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "state_conflict");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_up_then_down() {
        let rig = rig(longrun("web", 1));
        rig.controller
            .start(TriggerKind::Manual, &rig.cancel)
            .await
            .unwrap();
        assert_eq!(rig.spawner.live_pids().len(), 1);

        rig.controller
            .set_desired_scale(3, &rig.cancel)
            .await
            .unwrap();
        assert_eq!(rig.spawner.live_pids().len(), 3);
        let slots: Vec<u32> = rig
            .controller
            .snapshot()
            .instances
            .iter()
            .map(|i| i.slot)
            .collect();
        assert_eq!(slots, vec![0, 1, 2]);

        let slot0_pid = rig.controller.live_pids()[0].1;

        let controller = rig.controller.clone();
        let cancel = rig.cancel.clone();
        let scale_down =
            tokio::spawn(async move { controller.set_desired_scale(1, &cancel).await });
        let stop_signal = rig.controller.def().stop_signal.as_raw();
        drive_stops(&rig.spawner, stop_signal, 2).await;
        scale_down.await.unwrap().unwrap();

        // slots 1 and 2 retired, slot 0 untouched
        let snapshot = rig.controller.snapshot();
        assert_eq!(snapshot.instances.len(), 1);
        assert_eq!(snapshot.instances[0].slot, 0);
        assert_eq!(rig.controller.live_pids()[0].1, slot0_pid);
        assert_eq!(rig.controller.aggregate(), AggregateState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_desired_scale_idempotent() {
        let rig = rig(longrun("web", 2));
        rig.controller
            .start(TriggerKind::Manual, &rig.cancel)
            .await
            .unwrap();
        rig.controller
            .set_desired_scale(2, &rig.cancel)
            .await
            .unwrap();
        rig.controller
            .set_desired_scale(2, &rig.cancel)
            .await
            .unwrap();
        assert_eq!(rig.spawner.live_pids().len(), 2);
        assert_eq!(rig.spawner.spawn_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust_scale_round_trip() {
        let rig = rig(longrun("web", 2));
        rig.controller
            .start(TriggerKind::Manual, &rig.cancel)
            .await
            .unwrap();
        rig.controller.adjust_scale(2, &rig.cancel).await.unwrap();
        assert_eq!(rig.spawner.live_pids().len(), 4);

        let controller = rig.controller.clone();
        let cancel = rig.cancel.clone();
        let down = tokio::spawn(async move { controller.adjust_scale(-2, &cancel).await });
        drive_stops(&rig.spawner, rig.controller.def().stop_signal.as_raw(), 2).await;
        down.await.unwrap().unwrap();
        assert_eq!(rig.controller.snapshot().desired_scale, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust_scale_below_one_rejected() {
        let rig = rig(longrun("web", 1));
        let err = rig.controller.adjust_scale(-1, &rig.cancel).await.unwrap_err();
        assert_eq!(err.kind(), "config_invalid");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_zero_rejected() {
        let rig = rig(longrun("web", 1));
        let err = rig
            .controller
            .set_desired_scale(0, &rig.cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "config_invalid");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drains_and_conflicts_when_stopped() {
        let rig = rig(longrun("web", 2));
        rig.controller
            .start(TriggerKind::Manual, &rig.cancel)
            .await
            .unwrap();

        let controller = rig.controller.clone();
        let cancel = rig.cancel.clone();
        let stop = tokio::spawn(async move { controller.stop(&cancel).await });
        let stop_signal = rig.controller.def().stop_signal.as_raw();
        drive_stops(&rig.spawner, stop_signal, 2).await;
        stop.await.unwrap().unwrap();
        assert_eq!(rig.controller.aggregate(), AggregateState::Stopped);

        let err = rig.controller.stop(&rig.cancel).await.unwrap_err();
        assert_eq!(err.kind(), "state_conflict");
    }

    #[tokio::test(start_paused = true)]
    async fn test_oneshot_start_completes() {
        let mut def = longrun("migrate", 1);
        def.process_type = ProcessType::Oneshot;
        let mut r = rig(def);

        let controller = r.controller.clone();
        let cancel = r.cancel.clone();
        let start = tokio::spawn(async move { controller.start(TriggerKind::Manual, &cancel).await });
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while r.spawner.live_pids().is_empty() {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        r.spawner.exit_all(ExitStatus { code: Some(0), signal: None });
        start.await.unwrap().unwrap();

        assert_eq!(r.controller.aggregate(), AggregateState::Completed);
        let execution = r.exec_rx.recv().await.unwrap();
        assert_eq!(execution.exit_code, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_scheduled_and_reject_while_executing() {
        let mut def = longrun("report", 1);
        def.process_type = ProcessType::Scheduled;
        let r = rig(def);
        r.controller
            .start(TriggerKind::Manual, &r.cancel)
            .await
            .unwrap();
        // armed, no children
        assert!(r.spawner.live_pids().is_empty());

        let controller = r.controller.clone();
        let cancel = r.cancel.clone();
        let trigger =
            tokio::spawn(async move { controller.trigger(TriggerKind::Schedule, &cancel).await });
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while r.spawner.live_pids().is_empty() {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // second trigger while executing is rejected
        let err = r
            .controller
            .trigger(TriggerKind::Manual, &r.cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "state_conflict");

        r.spawner.exit_all(ExitStatus { code: Some(0), signal: None });
        trigger.await.unwrap().unwrap();
        assert_eq!(r.controller.snapshot().schedule_state, Some(ScheduleState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_blocks_trigger() {
        let mut def = longrun("report", 1);
        def.process_type = ProcessType::Scheduled;
        let r = rig(def);
        r.controller.pause().unwrap();
        let err = r
            .controller
            .trigger(TriggerKind::Schedule, &r.cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "state_conflict");
        r.controller.resume().unwrap();
        // trigger admissible again; fire and settle
        let controller = r.controller.clone();
        let cancel = r.cancel.clone();
        let trigger =
            tokio::spawn(async move { controller.trigger(TriggerKind::Schedule, &cancel).await });
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while r.spawner.live_pids().is_empty() {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        r.spawner.exit_all(ExitStatus { code: Some(0), signal: None });
        trigger.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_rejected_for_longrun() {
        let r = rig(longrun("web", 1));
        let err = r
            .controller
            .trigger(TriggerKind::Manual, &r.cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "state_conflict");
    }

    // real child in the hook, so real time
    #[tokio::test]
    async fn test_pre_start_hook_failure_aborts_start() {
        let mut def = longrun("web", 1);
        def.pre_start.push(crate::domain::Hook {
            name: "bad".to_string(),
            command: vec!["/bin/false".to_string()],
            env: Default::default(),
            working_dir: None,
            timeout_seconds: 0,
            retry: 0,
            retry_delay_seconds: 0,
            continue_on_error: false,
        });
        let r = rig(def);
        let err = r
            .controller
            .start(TriggerKind::Manual, &r.cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "hook_failed");
        assert!(r.spawner.live_pids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_restart_request_targets_slot() {
        let rig = rig(longrun("web", 2));
        rig.controller
            .start(TriggerKind::Manual, &rig.cancel)
            .await
            .unwrap();
        let first_pids = rig.spawner.live_pids();

        rig.controller.request_restart(1, RestartReason::HealthCheck);
        let stop_signal = rig.controller.def().stop_signal.as_raw();
        drive_stops(&rig.spawner, stop_signal, 1).await;

        // wait for the replacement child
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let live = rig.spawner.live_pids();
            if live.len() == 2 && live != first_pids {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
