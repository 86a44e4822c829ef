//! Instance controller
//! One task per slot drives the child through its whole lifecycle: backoff
//! gate, spawn, readiness, exit handling, restart decisions, and the stop
//! sequence. Control arrives as messages on the instance mailbox; the task
//! never holds a lock across an await point.

use crate::constants::process as defaults;
use crate::domain::ports::{ExitStatus, OutputSink, ProcessSpawner, SpawnSpec, SpawnedChild};
use crate::domain::{
    Instance, OneshotExecution, ProcessDef, ProcessType, RestartPolicy, StopSignal, TriggerKind,
};
use crate::infrastructure::metrics;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Message to an instance task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceCommand {
    /// Graceful stop, no respawn
    Stop,
    /// Graceful stop followed by an immediate respawn
    Restart(RestartReason),
}

/// Why a restart was requested, used as the metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    Manual,
    HealthCheck,
    Reload,
}

impl RestartReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::HealthCheck => "health_check",
            Self::Reload => "reload",
        }
    }
}

/// Health state published by the process health monitor, observed by
/// starting instances as their readiness gate
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthSnapshot {
    pub healthy: bool,
    /// Monotonic timestamp of the most recent successful probe
    pub last_success: Option<Instant>,
}

/// Everything an instance task needs; holds ids and channels, never a
/// reference back into the controller
pub struct InstanceContext {
    pub process: String,
    pub slot: u32,
    pub trigger: TriggerKind,
    pub def_rx: watch::Receiver<Arc<ProcessDef>>,
    pub cell: Arc<Mutex<Instance>>,
    pub cmd_rx: mpsc::Receiver<InstanceCommand>,
    pub spawner: Arc<dyn ProcessSpawner>,
    pub sink: Arc<dyn OutputSink>,
    /// Poked after every state change so the controller can re-derive the
    /// aggregate
    pub changed_tx: mpsc::UnboundedSender<()>,
    pub health_rx: watch::Receiver<HealthSnapshot>,
    /// Completed oneshot-style executions
    pub exec_tx: mpsc::UnboundedSender<OneshotExecution>,
}

impl InstanceContext {
    fn id(&self) -> String {
        format!("{}-{}", self.process, self.slot)
    }

    fn notify_changed(&self) {
        let _ = self.changed_tx.send(());
    }

    fn with_cell<R>(&self, f: impl FnOnce(&mut Instance) -> R) -> R {
        let mut cell = self.cell.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut cell)
    }
}

enum Outcome {
    /// Loop again, a respawn is due
    Respawn,
    /// The slot is settled; the task ends
    Finished,
}

/// Drive one slot until it reaches a terminal state with no respawn due
pub async fn run_instance(mut ctx: InstanceContext) {
    loop {
        match lifecycle_iteration(&mut ctx).await {
            Outcome::Respawn => continue,
            Outcome::Finished => break,
        }
    }
    ctx.notify_changed();
    debug!(instance = %ctx.id(), "Instance task finished");
}

/// One pass: wait out the backoff, spawn, supervise until exit or command
async fn lifecycle_iteration(ctx: &mut InstanceContext) -> Outcome {
    // Backoff gate
    if let Some(not_before) = ctx.with_cell(|c| c.next_restart_not_before()) {
        let now = Instant::now();
        if not_before > now {
            tokio::select! {
                _ = tokio::time::sleep(not_before - now) => {}
                cmd = ctx.cmd_rx.recv() => match cmd {
                    Some(InstanceCommand::Stop) | None => {
                        let _ = ctx.with_cell(|c| c.mark_stopped());
                        return Outcome::Finished;
                    }
                    // A restart request while waiting to restart just cuts
                    // the wait short
                    Some(InstanceCommand::Restart(_)) => {}
                },
            }
        }
    }

    let def = ctx.def_rx.borrow().clone();
    let spec = SpawnSpec {
        process: ctx.process.clone(),
        instance_id: ctx.id(),
        command: def.command.clone(),
        env: def.env.clone(),
        working_dir: def.working_dir.clone(),
        user: def.user.clone(),
        group: def.group.clone(),
    };

    let mut child = match ctx.spawner.spawn(spec, ctx.sink.clone()).await {
        Ok(child) => child,
        Err(e) => {
            warn!(instance = %ctx.id(), error = %e, "Spawn failed");
            return handle_exit(ctx, &def, ExitStatus { code: None, signal: None }, true);
        }
    };
    let pid = child.pid;
    let spawned_at = Instant::now();
    if ctx.with_cell(|c| c.mark_starting(pid)).is_err() {
        // Slot record got out of step; take the child down and give up
        let _ = ctx.spawner.signal(pid, StopSignal::SIGKILL.as_raw());
        let _ = child.exit.await;
        return Outcome::Finished;
    }
    ctx.notify_changed();

    let mut execution = if def.process_type != ProcessType::Longrun {
        Some(OneshotExecution::begin(&ctx.process, &ctx.id(), ctx.trigger))
    } else {
        None
    };

    // Readiness: first health check success, or surviving the min-healthy
    // window when no check is configured
    let ready = readiness_gate(ctx.health_rx.clone(), def.health_check.is_some(), spawned_at);
    tokio::pin!(ready);

    loop {
        tokio::select! {
            _ = &mut ready => break,
            status = &mut child.exit => {
                let status = status.unwrap_or(ExitStatus { code: Some(1), signal: None });
                let outcome = handle_exit(ctx, &def, status, false);
                return finish_execution(ctx, execution.take(), outcome);
            }
            cmd = ctx.cmd_rx.recv() => match cmd {
                Some(InstanceCommand::Stop) | None => {
                    stop_child(ctx, &def, pid, &mut child).await;
                    let _ = ctx.with_cell(|c| c.mark_stopped());
                    ctx.notify_changed();
                    return finish_execution(ctx, execution.take(), Outcome::Finished);
                }
                Some(InstanceCommand::Restart(reason)) => {
                    metrics::inc_restart(&ctx.process, reason.as_str());
                    stop_child(ctx, &def, pid, &mut child).await;
                    return respawn_fresh(ctx, execution.take());
                }
            },
        }
    }

    if ctx.with_cell(|c| c.mark_running()).is_err() {
        let _ = ctx.spawner.signal(pid, StopSignal::SIGKILL.as_raw());
        let _ = child.exit.await;
        return Outcome::Finished;
    }
    // Surviving the window ends the failure streak
    ctx.with_cell(|c| c.reset_failures());
    ctx.notify_changed();
    info!(instance = %ctx.id(), pid, "Instance running");

    // Supervise until exit or command
    loop {
        tokio::select! {
            status = &mut child.exit => {
                let status = status.unwrap_or(ExitStatus { code: Some(1), signal: None });
                let outcome = handle_exit(ctx, &def, status, false);
                return finish_execution(ctx, execution.take(), outcome);
            }
            cmd = ctx.cmd_rx.recv() => match cmd {
                Some(InstanceCommand::Stop) | None => {
                    stop_child(ctx, &def, pid, &mut child).await;
                    let _ = ctx.with_cell(|c| c.mark_stopped());
                    ctx.notify_changed();
                    return finish_execution(ctx, execution.take(), Outcome::Finished);
                }
                Some(InstanceCommand::Restart(reason)) => {
                    metrics::inc_restart(&ctx.process, reason.as_str());
                    stop_child(ctx, &def, pid, &mut child).await;
                    return respawn_fresh(ctx, execution.take());
                }
            },
        }
    }
}

/// Resolves when the instance counts as ready
async fn readiness_gate(
    mut health_rx: watch::Receiver<HealthSnapshot>,
    has_health_check: bool,
    spawned_at: Instant,
) {
    if !has_health_check {
        tokio::time::sleep(Duration::from_secs(defaults::DEFAULT_MIN_HEALTHY_SEC)).await;
        return;
    }
    loop {
        {
            let snap = *health_rx.borrow();
            if snap.last_success.map_or(false, |t| t >= spawned_at) {
                return;
            }
        }
        if health_rx.changed().await.is_err() {
            // Monitor gone; degrade to the min-healthy window
            tokio::time::sleep(Duration::from_secs(defaults::DEFAULT_MIN_HEALTHY_SEC)).await;
            return;
        }
    }
}

/// Spontaneous exit (or spawn failure): work out the next state under the
/// restart policy and arm the backoff when respawning
fn handle_exit(
    ctx: &InstanceContext,
    def: &ProcessDef,
    status: ExitStatus,
    spawn_failed: bool,
) -> Outcome {
    let failed = spawn_failed || !status.success();

    // A clean oneshot run is complete, never restarted
    if !spawn_failed && def.process_type != ProcessType::Longrun && status.success() {
        let _ = ctx.with_cell(|c| c.mark_completed(0));
        ctx.notify_changed();
        info!(instance = %ctx.id(), "Oneshot completed");
        return Outcome::Finished;
    }

    let restart = if spawn_failed {
        // A spawn error is a failure; only `never` declines the retry
        def.restart != RestartPolicy::Never
    } else {
        def.restart.should_restart(status.code, status.signal)
    };

    if restart {
        match ctx.with_cell(|c| c.schedule_restart(def, status.code, status.signal, failed)) {
            Ok(delay) => {
                metrics::inc_restart(&ctx.process, if failed { "failure" } else { "exit" });
                warn!(
                    instance = %ctx.id(),
                    code = ?status.code,
                    signal = ?status.signal,
                    delay_secs = delay.as_secs_f64(),
                    "Instance exited, restart scheduled"
                );
                ctx.notify_changed();
                Outcome::Respawn
            }
            Err(_) => Outcome::Finished,
        }
    } else {
        ctx.with_cell(|c| {
            c.record_final_exit(status.code, status.signal);
            let _ = c.mark_failed();
        });
        ctx.notify_changed();
        warn!(
            instance = %ctx.id(),
            code = ?status.code,
            signal = ?status.signal,
            "Instance exited, policy forbids restart"
        );
        Outcome::Finished
    }
}

/// Stop sequence: stop signal, grace window, SIGKILL, reap
async fn stop_child(ctx: &InstanceContext, def: &ProcessDef, pid: u32, child: &mut SpawnedChild) {
    let _ = ctx.with_cell(|c| c.mark_stopping());
    ctx.notify_changed();
    if ctx.spawner.signal(pid, def.stop_signal.as_raw()).is_err() {
        // Child is most likely already gone; the reap below settles it
        debug!(instance = %ctx.id(), pid, "Stop signal delivery failed");
    }
    let timeout = Duration::from_secs(def.stop_timeout_seconds);
    let status = tokio::select! {
        status = &mut child.exit => status.ok(),
        _ = tokio::time::sleep(timeout) => {
            warn!(
                instance = %ctx.id(),
                pid,
                timeout_secs = def.stop_timeout_seconds,
                "Stop timed out, sending SIGKILL"
            );
            let _ = ctx.spawner.signal(pid, StopSignal::SIGKILL.as_raw());
            (&mut child.exit).await.ok()
        }
    };
    if let Some(status) = status {
        ctx.with_cell(|c| c.record_final_exit(status.code, status.signal));
    }
}

/// After a commanded restart the slot re-enters the loop with a fresh
/// record under the same id; the restart counter carries over
fn respawn_fresh(ctx: &InstanceContext, execution: Option<OneshotExecution>) -> Outcome {
    if let Some(mut execution) = execution {
        execution.finish(None, Some("restarted".to_string()));
        let _ = ctx.exec_tx.send(execution);
    }
    ctx.with_cell(|c| {
        let _ = c.mark_stopped();
        *c = c.renew();
    });
    ctx.notify_changed();
    Outcome::Respawn
}

/// Record the execution outcome once the slot settles
fn finish_execution(
    ctx: &InstanceContext,
    execution: Option<OneshotExecution>,
    outcome: Outcome,
) -> Outcome {
    if let Some(mut execution) = execution {
        let (code, error) = ctx.with_cell(|c| {
            let code = c.last_exit_code();
            let error = match code {
                Some(0) => None,
                Some(n) => Some(format!("exited with code {}", n)),
                None => c.last_signal().map(|s| format!("killed by signal {}", s)),
            };
            (code, error)
        });
        execution.finish(code, error);
        let _ = ctx.exec_tx.send(execution);
    }
    outcome
}
