//! Port for spawning and signalling OS children
//! The application layer drives instances exclusively through this trait so
//! controllers can be exercised with an in-memory fake.

use crate::domain::DomainError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

/// Everything needed to start one child
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Owning process name, exported as PHPEEK_PM_PROCESS_NAME
    pub process: String,
    /// Instance id, exported as PHPEEK_PM_INSTANCE_ID
    pub instance_id: String,
    /// Argv tokens; the first is resolved via PATH when not absolute
    pub command: Vec<String>,
    /// Merged over the manager environment
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    /// Name or numeric uid, resolved at spawn time
    pub user: Option<String>,
    pub group: Option<String>,
}

/// How a child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0) && self.signal.is_none()
    }
}

/// A line captured from a child's stdout or stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Handle to a spawned child. Dropping the handle does not kill the child;
/// the exit receiver resolves exactly once when the child is reaped.
#[derive(Debug)]
pub struct SpawnedChild {
    pub pid: u32,
    /// Resolves when the child has been waited on
    pub exit: oneshot::Receiver<ExitStatus>,
}

/// Sink for captured output lines
pub trait OutputSink: Send + Sync + 'static {
    fn push_line(&self, instance_id: &str, stream: OutputStream, line: String);
}

/// Port for process execution
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    /// Spawn a child; output lines flow to `sink` until the pipes close.
    /// The implementation owns the reap: the returned exit receiver always
    /// resolves, also when the caller goes away.
    async fn spawn(
        &self,
        spec: SpawnSpec,
        sink: std::sync::Arc<dyn OutputSink>,
    ) -> Result<SpawnedChild, DomainError>;

    /// Deliver a signal to a pid
    fn signal(&self, pid: u32, signal: i32) -> Result<(), DomainError>;
}

/// Forward lines from a child pipe to the sink. Shared by the real spawner;
/// lives here so fakes can reuse it.
pub async fn forward_lines<R>(
    reader: R,
    instance_id: String,
    stream: OutputStream,
    sink: std::sync::Arc<dyn OutputSink>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        sink.push_line(&instance_id, stream, line);
    }
}
