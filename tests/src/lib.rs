//! Shared helpers for the end-to-end tests
//! Every test drives a real SupervisionScheduler with real children
//! (`/bin/sleep`, `sh -c`) through the engine's public surface.

use phpeek_pm::{
    AggregateState, LogCollector, ProcessDef, SupervisionScheduler, UnixProcessSpawner,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestStack {
    pub scheduler: Arc<SupervisionScheduler>,
    /// Scratch space for config files and marker files
    pub dir: TempDir,
    pub config_path: PathBuf,
}

/// Build a scheduler over a temp config path without reading the file
pub async fn stack_with(defs: Vec<ProcessDef>) -> TestStack {
    let dir = TempDir::new().expect("temp dir");
    let config_path = dir.path().join("phpeek-pm.yaml");
    let map: BTreeMap<String, Arc<ProcessDef>> = defs
        .into_iter()
        .map(|d| (d.name.clone(), Arc::new(d)))
        .collect();
    let scheduler = SupervisionScheduler::new(
        config_path.clone(),
        map,
        Arc::new(UnixProcessSpawner::new()),
        Arc::new(LogCollector::new()),
    )
    .await
    .expect("scheduler");
    TestStack {
        scheduler,
        dir,
        config_path,
    }
}

/// A longrun definition with quick stop behavior for tests
pub fn longrun(name: &str, command: &[&str]) -> ProcessDef {
    let mut def = ProcessDef::new(name, command.iter().map(|s| s.to_string()).collect());
    def.restart_delay_seconds = 1;
    def.stop_timeout_seconds = 2;
    def
}

/// Poll until the process reaches the wanted aggregate state
pub async fn wait_for_state(
    scheduler: &SupervisionScheduler,
    name: &str,
    state: AggregateState,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let (snapshot, _) = scheduler.describe(name).await.expect("describe");
        if snapshot.state == state {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{} never reached {}, currently {}",
            name,
            state,
            snapshot.state
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Poll an arbitrary condition over the process snapshot
pub async fn wait_for<F>(scheduler: &SupervisionScheduler, name: &str, timeout: Duration, pred: F)
where
    F: Fn(&phpeek_pm::ProcessSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let (snapshot, _) = scheduler.describe(name).await.expect("describe");
        if pred(&snapshot) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition never held for {}",
            name
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
