//! Hook executor
//! Runs lifecycle hook commands with a hard deadline, retry with delay, and
//! per-hook environment. A timed-out hook gets SIGTERM, two seconds, then
//! SIGKILL.

use crate::constants::{env as env_keys, hook as defaults};
use crate::domain::{DomainError, Hook, HookKind};
use crate::infrastructure::metrics;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a single hook invocation failed
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HookError {
    #[error("hook command is empty")]
    EmptyCommand,
    #[error("failed to spawn: {0}")]
    SpawnFailed(String),
    #[error("timed out")]
    TimedOut,
    #[error("exited with code {0}")]
    NonZeroExit(i32),
    #[error("killed by signal {0}")]
    Signalled(i32),
    #[error("cancelled")]
    ContextCancelled,
}

impl HookError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyCommand => "empty_command",
            Self::SpawnFailed(_) => "spawn_failed",
            Self::TimedOut => "timed_out",
            Self::NonZeroExit(_) => "non_zero_exit",
            Self::Signalled(_) => "signalled",
            Self::ContextCancelled => "context_cancelled",
        }
    }
}

/// Ambient data a hook runs with
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Name of the owning process, exported to the hook child
    pub process: String,
}

/// Run one hook to completion, honoring retries. Wall time of a failing
/// hook with `retry` attempts and delay `d` is at least `retry × d`.
pub async fn execute(
    hook: &Hook,
    context: &HookContext,
    cancel: &CancellationToken,
) -> Result<(), HookError> {
    let attempts = hook.retry + 1;
    let mut last_err = HookError::EmptyCommand;

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(HookError::ContextCancelled);
        }
        match execute_once(hook, context, cancel).await {
            Ok(()) => {
                debug!(hook = %hook.name, attempt, "Hook succeeded");
                return Ok(());
            }
            Err(err @ HookError::ContextCancelled) => return Err(err),
            Err(err) => {
                warn!(
                    hook = %hook.name,
                    attempt,
                    attempts,
                    error = %err,
                    "Hook attempt failed"
                );
                last_err = err;
                if attempt < attempts && hook.retry_delay_seconds > 0 {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(hook.retry_delay_seconds)) => {}
                        _ = cancel.cancelled() => return Err(HookError::ContextCancelled),
                    }
                }
            }
        }
    }
    Err(last_err)
}

/// One attempt: spawn, race the deadline, reap
async fn execute_once(
    hook: &Hook,
    context: &HookContext,
    cancel: &CancellationToken,
) -> Result<(), HookError> {
    let program = match hook.command.first() {
        Some(p) if !p.is_empty() => p,
        _ => return Err(HookError::EmptyCommand),
    };

    let mut cmd = Command::new(program);
    cmd.args(&hook.command[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .env(env_keys::HOOK_NAME, &hook.name)
        .env(env_keys::PROCESS_NAME, &context.process);
    for (key, value) in &hook.env {
        cmd.env(key, value);
    }
    if let Some(dir) = &hook.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| HookError::SpawnFailed(e.to_string()))?;

    let deadline = Duration::from_secs(hook.effective_timeout_seconds());
    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|e| HookError::SpawnFailed(e.to_string()))?;
            exit_result(status)
        }
        _ = tokio::time::sleep(deadline) => {
            terminate(&mut child).await;
            Err(HookError::TimedOut)
        }
        _ = cancel.cancelled() => {
            terminate(&mut child).await;
            Err(HookError::ContextCancelled)
        }
    }
}

fn exit_result(status: std::process::ExitStatus) -> Result<(), HookError> {
    use std::os::unix::process::ExitStatusExt;

    if status.success() {
        return Ok(());
    }
    if let Some(signal) = status.signal() {
        return Err(HookError::Signalled(signal));
    }
    Err(HookError::NonZeroExit(status.code().unwrap_or(-1)))
}

/// SIGTERM, a short grace window, then SIGKILL; always reaps
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
        let grace = Duration::from_secs(defaults::KILL_GRACE_SEC);
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Run a hook sequence in order. The first failure of a hook without
/// `continue_on_error` aborts the sequence; later hooks do not run. Every
/// outcome is recorded to metrics under the lifecycle point label.
pub async fn execute_sequence(
    hooks: &[Hook],
    kind: HookKind,
    context: &HookContext,
    cancel: &CancellationToken,
) -> Result<(), DomainError> {
    for hook in hooks {
        let started = Instant::now();
        let result = execute(hook, context, cancel).await;
        let outcome = match &result {
            Ok(()) => "success",
            Err(e) => e.kind(),
        };
        metrics::observe_hook_duration(&hook.name, kind.as_str(), outcome, started.elapsed());

        match result {
            Ok(()) => {}
            Err(err) if hook.continue_on_error => {
                warn!(
                    hook = %hook.name,
                    kind = kind.as_str(),
                    error = %err,
                    "Hook failed, continuing per configuration"
                );
            }
            Err(HookError::TimedOut) => {
                return Err(DomainError::HookTimedOut {
                    name: hook.name.clone(),
                });
            }
            Err(err) => {
                return Err(DomainError::HookFailed {
                    name: hook.name.clone(),
                    kind: err.kind().to_string(),
                });
            }
        }
    }
    Ok(())
}
