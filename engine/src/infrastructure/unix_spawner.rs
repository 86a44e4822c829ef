//! Unix process spawner
//! Real implementation of the spawner port on top of tokio::process. Children
//! get their own session, optional credential switching, and piped output.
//! Every spawn is paired with a reap task that always runs.

use crate::constants::env as env_keys;
use crate::domain::ports::{
    forward_lines, ExitStatus, OutputSink, OutputStream, ProcessSpawner, SpawnSpec, SpawnedChild,
};
use crate::domain::DomainError;
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{Group, Pid, User};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

pub struct UnixProcessSpawner;

impl UnixProcessSpawner {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a user given by name or numeric id
    fn resolve_uid(user: &str) -> Result<u32, DomainError> {
        if let Ok(uid) = user.parse::<u32>() {
            return Ok(uid);
        }
        match User::from_name(user) {
            Ok(Some(entry)) => Ok(entry.uid.as_raw()),
            Ok(None) => Err(DomainError::SpawnFailed {
                name: user.to_string(),
                cause: format!("user '{}' not found", user),
            }),
            Err(e) => Err(DomainError::SpawnFailed {
                name: user.to_string(),
                cause: format!("user lookup failed: {}", e),
            }),
        }
    }

    /// Resolve a group given by name or numeric id
    fn resolve_gid(group: &str) -> Result<u32, DomainError> {
        if let Ok(gid) = group.parse::<u32>() {
            return Ok(gid);
        }
        match Group::from_name(group) {
            Ok(Some(entry)) => Ok(entry.gid.as_raw()),
            Ok(None) => Err(DomainError::SpawnFailed {
                name: group.to_string(),
                cause: format!("group '{}' not found", group),
            }),
            Err(e) => Err(DomainError::SpawnFailed {
                name: group.to_string(),
                cause: format!("group lookup failed: {}", e),
            }),
        }
    }
}

impl Default for UnixProcessSpawner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessSpawner for UnixProcessSpawner {
    async fn spawn(
        &self,
        spec: SpawnSpec,
        sink: Arc<dyn OutputSink>,
    ) -> Result<SpawnedChild, DomainError> {
        let program = spec.command.first().ok_or_else(|| DomainError::SpawnFailed {
            name: spec.process.clone(),
            cause: "empty command".to_string(),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(&spec.command[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env(env_keys::PROCESS_NAME, &spec.process)
            .env(env_keys::INSTANCE_ID, &spec.instance_id);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        // Credentials are resolved once, before the fork
        let uid = spec.user.as_deref().map(Self::resolve_uid).transpose()?;
        let gid = spec.group.as_deref().map(Self::resolve_gid).transpose()?;
        if let Some(uid) = uid {
            debug!(process = %spec.process, uid, "Resolved child user");
        }

        unsafe {
            cmd.pre_exec(move || {
                // Own session so the child does not share our signal fate
                if libc::setsid() < 0 {
                    // Already a session leader, not fatal
                }
                // Group before user, setuid drops the privilege to setgid
                if let Some(gid) = gid {
                    if libc::setgid(gid) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                }
                if let Some(uid) = uid {
                    if libc::setuid(uid) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|e| {
            error!(process = %spec.process, command = %program, error = %e, "Spawn failed");
            DomainError::SpawnFailed {
                name: spec.process.clone(),
                cause: e.to_string(),
            }
        })?;

        let pid = child.id().ok_or_else(|| DomainError::SpawnFailed {
            name: spec.process.clone(),
            cause: "child exited before pid could be read".to_string(),
        })?;

        info!(
            process = %spec.process,
            instance = %spec.instance_id,
            pid,
            "Spawned child"
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(
                stdout,
                spec.instance_id.clone(),
                OutputStream::Stdout,
                sink.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(
                stderr,
                spec.instance_id.clone(),
                OutputStream::Stderr,
                sink,
            ));
        }

        // The reap task owns the child from here; it always waits, so no
        // zombie survives a cancelled caller.
        let (exit_tx, exit_rx) = oneshot::channel();
        let instance_id = spec.instance_id.clone();
        tokio::spawn(async move {
            let status = match child.wait().await {
                Ok(status) => ExitStatus {
                    code: status.code(),
                    signal: status.signal(),
                },
                Err(e) => {
                    error!(instance = %instance_id, error = %e, "Wait on child failed");
                    ExitStatus {
                        code: Some(1),
                        signal: None,
                    }
                }
            };
            debug!(
                instance = %instance_id,
                pid,
                code = ?status.code,
                signal = ?status.signal,
                "Child exited"
            );
            let _ = exit_tx.send(status);
        });

        Ok(SpawnedChild { pid, exit: exit_rx })
    }

    fn signal(&self, pid: u32, signal: i32) -> Result<(), DomainError> {
        let sig = Signal::try_from(signal).map_err(|e| DomainError::Internal {
            cause: format!("invalid signal {}: {}", signal, e),
        })?;
        kill(Pid::from_raw(pid as i32), sig).map_err(|e| DomainError::Internal {
            cause: format!("kill({}, {}) failed: {}", pid, signal, e),
        })
    }
}
