//! In-memory fake of the spawner port for unit tests
//! Children are bookkeeping entries whose exits the test script drives.

use super::{ExitStatus, OutputSink, ProcessSpawner, SpawnSpec, SpawnedChild};
use crate::domain::DomainError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

struct FakeChild {
    spec: SpawnSpec,
    exit_tx: oneshot::Sender<ExitStatus>,
}

/// Scripted spawner: every spawn succeeds (unless failure is armed) and the
/// test decides when and how each child exits.
#[derive(Clone, Default)]
pub struct MockSpawner {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Default)]
struct MockInner {
    next_pid: u32,
    children: HashMap<u32, FakeChild>,
    fail_next_spawn: bool,
    spawn_count: u32,
    signals: Vec<(u32, i32)>,
}

impl MockSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next spawn call returns a spawn error
    pub fn fail_next_spawn(&self) {
        self.inner.lock().unwrap().fail_next_spawn = true;
    }

    pub fn spawn_count(&self) -> u32 {
        self.inner.lock().unwrap().spawn_count
    }

    /// Signals delivered so far, in order
    pub fn signals(&self) -> Vec<(u32, i32)> {
        self.inner.lock().unwrap().signals.clone()
    }

    /// Pids of children that have not exited yet
    pub fn live_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.inner.lock().unwrap().children.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn spec_of(&self, pid: u32) -> Option<SpawnSpec> {
        self.inner
            .lock()
            .unwrap()
            .children
            .get(&pid)
            .map(|c| c.spec.clone())
    }

    /// Make the child identified by `pid` exit with the given status
    pub fn exit(&self, pid: u32, status: ExitStatus) {
        let child = self.inner.lock().unwrap().children.remove(&pid);
        if let Some(child) = child {
            let _ = child.exit_tx.send(status);
        }
    }

    /// Exit every live child with the given status
    pub fn exit_all(&self, status: ExitStatus) {
        for pid in self.live_pids() {
            self.exit(pid, status);
        }
    }
}

#[async_trait]
impl ProcessSpawner for MockSpawner {
    async fn spawn(
        &self,
        spec: SpawnSpec,
        _sink: Arc<dyn OutputSink>,
    ) -> Result<SpawnedChild, DomainError> {
        let mut inner = self.inner.lock().unwrap();
        inner.spawn_count += 1;
        if inner.fail_next_spawn {
            inner.fail_next_spawn = false;
            return Err(DomainError::SpawnFailed {
                name: spec.process.clone(),
                cause: "scripted spawn failure".to_string(),
            });
        }
        inner.next_pid += 1;
        let pid = inner.next_pid + 1000;
        let (exit_tx, exit) = oneshot::channel();
        inner.children.insert(pid, FakeChild { spec, exit_tx });
        Ok(SpawnedChild { pid, exit })
    }

    fn signal(&self, pid: u32, signal: i32) -> Result<(), DomainError> {
        let mut inner = self.inner.lock().unwrap();
        inner.signals.push((pid, signal));
        // SIGKILL always takes the fake child down
        if signal == libc::SIGKILL {
            if let Some(child) = inner.children.remove(&pid) {
                let _ = child.exit_tx.send(ExitStatus {
                    code: None,
                    signal: Some(libc::SIGKILL),
                });
            }
        }
        Ok(())
    }
}

/// Sink that remembers nothing, for tests that do not care about output
pub struct NullSink;

impl OutputSink for NullSink {
    fn push_line(&self, _instance_id: &str, _stream: super::OutputStream, _line: String) {}
}
