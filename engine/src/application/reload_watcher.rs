//! Config reload watcher glue
//! Funnels filesystem change notifications for the config file into a
//! debounce window, then hands a freshly parsed definition map to the
//! scheduler. A parse or validation failure leaves the running config
//! authoritative.

use crate::application::scheduler::SupervisionScheduler;
use crate::constants::RELOAD_DEBOUNCE_MS;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watch the config file and reload on change. Returns the watcher task;
/// the `notify` watcher lives inside it and dies with it.
pub fn spawn(
    scheduler: Arc<SupervisionScheduler>,
    config_path: PathBuf,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher = match RecommendedWatcher::new(
            move |result: Result<notify::Event, notify::Error>| {
                if let Ok(event) = result {
                    if event.kind.is_modify() || event.kind.is_create() {
                        let _ = event_tx.send(());
                    }
                }
            },
            notify::Config::default(),
        ) {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "Config watcher unavailable, reload on demand only");
                return;
            }
        };

        // Watch the parent directory: editors replace files by rename
        let watch_target = config_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| config_path.clone());
        if let Err(e) = watcher.watch(&watch_target, RecursiveMode::NonRecursive) {
            warn!(error = %e, path = %watch_target.display(), "Cannot watch config path");
            return;
        }
        info!(path = %config_path.display(), "Watching config file for changes");

        run_debounce_loop(scheduler, event_rx, cancel).await;
        drop(watcher);
    })
}

/// Collapse change bursts into one reload per quiet window
async fn run_debounce_loop(
    scheduler: Arc<SupervisionScheduler>,
    mut event_rx: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
) {
    let window = Duration::from_millis(RELOAD_DEBOUNCE_MS);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = event_rx.recv() => {
                if event.is_none() {
                    break;
                }
                // Absorb the burst until the file settles
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(window) => break,
                        more = event_rx.recv() => {
                            if more.is_none() {
                                break;
                            }
                            debug!("Config change burst continues");
                        }
                    }
                }
                info!("Config file changed, reloading");
                match scheduler.reload_from_disk(&cancel).await {
                    Ok(()) => info!("Reload from disk applied"),
                    Err(err) => {
                        warn!(error = %err, "Reload rejected, previous config stays active");
                    }
                }
            }
        }
    }
    debug!("Config watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::MockSpawner;
    use crate::infrastructure::{config, LogCollector};
    use std::io::Write;

    const INITIAL: &str = "processes:\n  web:\n    command: [\"/bin/sleep\", \"60\"]\n";
    const CHANGED: &str = concat!(
        "processes:\n",
        "  web:\n    command: [\"/bin/sleep\", \"60\"]\n",
        "  extra:\n    command: [\"/bin/sleep\", \"60\"]\n",
    );

    #[tokio::test]
    async fn test_file_change_triggers_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phpeek-pm.yaml");
        std::fs::write(&path, INITIAL).unwrap();

        let defs = config::load(&path).unwrap();
        let scheduler = SupervisionScheduler::new(
            path.clone(),
            defs,
            Arc::new(MockSpawner::new()),
            Arc::new(LogCollector::new()),
        )
        .await
        .unwrap();

        let cancel = CancellationToken::new();
        let watcher = spawn(scheduler.clone(), path.clone(), cancel.clone());
        // give the watcher a beat to arm
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(CHANGED.as_bytes()).unwrap();
        file.sync_all().unwrap();
        drop(file);

        // debounce window plus slack; the new process appears stopped
        // (reload starts added processes, and with a mock spawner the
        // start settles immediately once the fake child is running)
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let names: Vec<String> = scheduler.list().await.into_iter().map(|s| s.name).collect();
            if names.contains(&"extra".to_string()) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "reload never applied");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        cancel.cancel();
        let _ = watcher.await;
    }

    #[tokio::test]
    async fn test_invalid_change_keeps_previous_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phpeek-pm.yaml");
        std::fs::write(&path, INITIAL).unwrap();

        let defs = config::load(&path).unwrap();
        let scheduler = SupervisionScheduler::new(
            path.clone(),
            defs,
            Arc::new(MockSpawner::new()),
            Arc::new(LogCollector::new()),
        )
        .await
        .unwrap();

        let cancel = CancellationToken::new();
        let watcher = spawn(scheduler.clone(), path.clone(), cancel.clone());
        tokio::time::sleep(Duration::from_millis(200)).await;

        std::fs::write(&path, "processes:\n  web:\n    command: []\n").unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // rejected reload leaves the old map authoritative
        let (_, def) = scheduler.describe("web").await.unwrap();
        assert_eq!(def.command.len(), 2);

        cancel.cancel();
        let _ = watcher.await;
    }
}
