//! Supervision scheduler
//! Single authoritative owner of the runtime table. Per-process operations
//! go through each controller's own lock; cross-process operations
//! (start-all, stop-all, reload) hold the scheduler-wide coordinator and
//! walk the dependency order, so they can never interleave into a deadlock.

use crate::application::health_monitor;
use crate::application::process_controller::{ProcessController, ProcessSnapshot};
use crate::application::resource_sampler::{ResourceSampler, SampleTarget};
use crate::domain::services::{dependency_graph, reload_diff};
use crate::domain::{
    DomainError, OneshotExecution, OneshotHistory, ProcessDef, TriggerKind,
};
use crate::infrastructure::{config, metrics, LogCollector};
use crate::domain::ports::ProcessSpawner;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct ProcessEntry {
    controller: Arc<ProcessController>,
    health_cancel: Option<CancellationToken>,
}

impl ProcessEntry {
    fn stop_health_monitor(&mut self) {
        if let Some(cancel) = self.health_cancel.take() {
            cancel.cancel();
        }
    }
}

pub struct SupervisionScheduler {
    config_path: PathBuf,
    spawner: Arc<dyn ProcessSpawner>,
    logs: Arc<LogCollector>,
    /// Every definition from the config, disabled ones included
    defs: RwLock<BTreeMap<String, Arc<ProcessDef>>>,
    /// One runtime entry per enabled definition
    entries: RwLock<HashMap<String, ProcessEntry>>,
    /// Orders cross-process operations against each other
    coordinator: tokio::sync::Mutex<()>,
    history: Arc<Mutex<OneshotHistory>>,
    exec_tx: mpsc::UnboundedSender<OneshotExecution>,
    collector_task: Mutex<Option<JoinHandle<()>>>,
    /// Attached by the daemon so deletes can drop the per-instance rings
    sampler: Mutex<Option<Arc<ResourceSampler>>>,
    cancel: CancellationToken,
}

impl SupervisionScheduler {
    pub async fn new(
        config_path: PathBuf,
        defs: BTreeMap<String, Arc<ProcessDef>>,
        spawner: Arc<dyn ProcessSpawner>,
        logs: Arc<LogCollector>,
    ) -> Result<Arc<Self>, DomainError> {
        config::validate_map(&defs)?;

        let history = Arc::new(Mutex::new(OneshotHistory::new()));
        let (exec_tx, mut exec_rx) = mpsc::unbounded_channel::<OneshotExecution>();
        let collector_history = history.clone();
        let collector = tokio::spawn(async move {
            while let Some(execution) = exec_rx.recv().await {
                collector_history
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(execution);
            }
        });

        let scheduler = Arc::new(Self {
            config_path,
            spawner,
            logs,
            defs: RwLock::new(BTreeMap::new()),
            entries: RwLock::new(HashMap::new()),
            coordinator: tokio::sync::Mutex::new(()),
            history,
            exec_tx,
            collector_task: Mutex::new(Some(collector)),
            sampler: Mutex::new(None),
            cancel: CancellationToken::new(),
        });

        {
            let mut defs_guard = scheduler.defs.write().await;
            let mut entries = scheduler.entries.write().await;
            for (name, def) in defs {
                if def.enabled {
                    entries.insert(name.clone(), scheduler.make_entry(def.clone()));
                }
                defs_guard.insert(name, def);
            }
            metrics::set_manager_processes(entries.len());
        }
        Ok(scheduler)
    }

    fn make_entry(&self, def: Arc<ProcessDef>) -> ProcessEntry {
        let controller = ProcessController::new(
            def.clone(),
            self.spawner.clone(),
            self.logs.clone(),
            self.exec_tx.clone(),
        );
        let health_cancel = def.health_check.as_ref().map(|_| {
            let cancel = self.cancel.child_token();
            health_monitor::spawn(controller.clone(), cancel.clone());
            cancel
        });
        ProcessEntry {
            controller,
            health_cancel,
        }
    }

    /// Restart the health monitor when a definition swap changed the check
    fn refresh_health_monitor(&self, entry: &mut ProcessEntry, def: &Arc<ProcessDef>) {
        entry.stop_health_monitor();
        if def.health_check.is_some() {
            let cancel = self.cancel.child_token();
            health_monitor::spawn(entry.controller.clone(), cancel.clone());
            entry.health_cancel = Some(cancel);
        }
    }

    pub fn attach_sampler(&self, sampler: Arc<ResourceSampler>) {
        *self.sampler.lock().unwrap_or_else(|e| e.into_inner()) = Some(sampler);
    }

    fn forget_sampled(&self, process: &str) {
        if let Some(sampler) = self
            .sampler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            sampler.forget_process(process);
        }
    }

    async fn controller(&self, name: &str) -> Result<Arc<ProcessController>, DomainError> {
        let entries = self.entries.read().await;
        entries
            .get(name)
            .map(|e| e.controller.clone())
            .ok_or_else(|| DomainError::NotFound {
                name: name.to_string(),
            })
    }

    pub async fn current_defs(&self) -> BTreeMap<String, Arc<ProcessDef>> {
        self.defs.read().await.clone()
    }

    async fn enabled_defs(&self) -> BTreeMap<String, Arc<ProcessDef>> {
        self.defs
            .read()
            .await
            .iter()
            .filter(|(_, d)| d.enabled)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // ---- queries ------------------------------------------------------

    pub async fn list(&self) -> Vec<ProcessSnapshot> {
        let entries = self.entries.read().await;
        let mut snapshots: Vec<ProcessSnapshot> =
            entries.values().map(|e| e.controller.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub async fn describe(
        &self,
        name: &str,
    ) -> Result<(ProcessSnapshot, Arc<ProcessDef>), DomainError> {
        let controller = self.controller(name).await?;
        Ok((controller.snapshot(), controller.def()))
    }

    pub fn oneshot_history(&self, limit: usize) -> Vec<OneshotExecution> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .recent(limit)
    }

    pub fn oneshot_history_for(&self, process: &str, limit: usize) -> Vec<OneshotExecution> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .recent_for(process, limit)
    }

    /// Live instances across all processes, for the resource sampler
    pub fn sample_targets(self: &Arc<Self>) -> Vec<SampleTarget> {
        let Ok(entries) = self.entries.try_read() else {
            // A writer holds the table; skip this tick rather than block it
            return Vec::new();
        };
        entries
            .values()
            .flat_map(|e| {
                let process = e.controller.name().to_string();
                e.controller
                    .live_pids()
                    .into_iter()
                    .map(move |(id, pid)| (process.clone(), id, pid))
            })
            .collect()
    }

    // ---- per-process operations --------------------------------------

    pub async fn start_process(&self, name: &str, cancel: &CancellationToken) -> Result<(), DomainError> {
        self.controller(name).await?.start(TriggerKind::Manual, cancel).await
    }

    pub async fn stop_process(&self, name: &str, cancel: &CancellationToken) -> Result<(), DomainError> {
        self.controller(name).await?.stop(cancel).await
    }

    pub async fn restart_process(&self, name: &str, cancel: &CancellationToken) -> Result<(), DomainError> {
        self.controller(name).await?.restart(cancel).await
    }

    pub async fn set_scale(
        &self,
        name: &str,
        desired: u32,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        self.controller(name).await?.set_desired_scale(desired, cancel).await
    }

    pub async fn adjust_scale(
        &self,
        name: &str,
        delta: i64,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        self.controller(name).await?.adjust_scale(delta, cancel).await
    }

    pub async fn trigger_process(
        &self,
        name: &str,
        kind: TriggerKind,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        self.controller(name).await?.trigger(kind, cancel).await
    }

    pub async fn pause_process(&self, name: &str) -> Result<(), DomainError> {
        self.controller(name).await?.pause()
    }

    pub async fn resume_process(&self, name: &str) -> Result<(), DomainError> {
        self.controller(name).await?.resume()
    }

    // ---- cross-process operations ------------------------------------

    /// Start every enabled process in dependency order, blocking on each
    /// until it runs. The first failure aborts and names what never started.
    pub async fn start_all(&self, cancel: &CancellationToken) -> Result<(), DomainError> {
        let _coordinator = self.coordinator.lock().await;
        let order = dependency_graph::start_order(&self.enabled_defs().await)?;
        info!(order = ?order, "Starting all processes");

        for (position, name) in order.iter().enumerate() {
            let controller = self.controller(name).await?;
            match controller.start(TriggerKind::Dependency, cancel).await {
                Ok(()) => {}
                Err(DomainError::StateConflict { .. }) => {
                    // already running, nothing to do
                }
                Err(err) => {
                    let not_started: Vec<&String> = order[position..].iter().collect();
                    error!(
                        process = %name,
                        error = %err,
                        not_started = ?not_started,
                        "Start-all aborted"
                    );
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Stop everything in reverse dependency order, best effort. With a
    /// deadline the remaining stops are cancelled when it passes and the
    /// partial-failure report comes back as the error.
    pub async fn stop_all(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Duration>,
    ) -> Result<(), DomainError> {
        let _coordinator = self.coordinator.lock().await;
        let order = dependency_graph::stop_order(&self.enabled_defs().await)?;
        info!(order = ?order, "Stopping all processes");

        let effective = cancel.child_token();
        let _deadline_guard = deadline.map(|d| {
            let token = effective.clone();
            tokio::spawn(async move {
                tokio::time::sleep(d).await;
                token.cancel();
            })
        });

        let mut failures: Vec<String> = Vec::new();
        for name in &order {
            let Ok(controller) = self.controller(name).await else {
                continue;
            };
            match controller.stop(&effective).await {
                Ok(()) => {}
                Err(DomainError::StateConflict { .. }) => {}
                Err(DomainError::Cancelled { .. }) => {
                    failures.push(format!("{}: deadline exceeded", name));
                }
                Err(err) => {
                    warn!(process = %name, error = %err, "Stop failed, continuing");
                    failures.push(format!("{}: {}", name, err));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Timeout {
                operation: format!("stop-all ({})", failures.join("; ")),
            })
        }
    }

    // ---- table mutations ---------------------------------------------

    /// Add a process definition. The new process is created stopped; a
    /// lifecycle call brings it up.
    pub async fn add_process(&self, def: ProcessDef) -> Result<(), DomainError> {
        def.validate()?;
        let def = Arc::new(def);

        let mut defs = self.defs.write().await;
        if defs.contains_key(&def.name) {
            return Err(DomainError::AlreadyExists {
                name: def.name.clone(),
            });
        }
        let mut next = defs.clone();
        next.insert(def.name.clone(), def.clone());
        config::validate_map(&next)?;

        let mut entries = self.entries.write().await;
        if def.enabled {
            entries.insert(def.name.clone(), self.make_entry(def.clone()));
        }
        *defs = next;
        metrics::set_manager_processes(entries.len());
        info!(process = %def.name, "Process added");
        Ok(())
    }

    /// Replace a definition. Restart-significant changes roll the
    /// instances, scale-only changes reconcile, anything else only swaps
    /// the definition.
    pub async fn update_process(
        &self,
        def: ProcessDef,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        def.validate()?;
        let def = Arc::new(def);
        let name = def.name.clone();

        let old = {
            let mut defs = self.defs.write().await;
            let Some(old) = defs.get(&name).cloned() else {
                return Err(DomainError::NotFound { name });
            };
            let mut next = defs.clone();
            next.insert(name.clone(), def.clone());
            config::validate_map(&next)?;
            *defs = next;
            old
        };

        let controller = {
            let mut entries = self.entries.write().await;
            match entries.get_mut(&name) {
                Some(entry) => {
                    entry.controller.replace_def(def.clone());
                    if old.health_check != def.health_check {
                        self.refresh_health_monitor(entry, &def);
                    }
                    Some(entry.controller.clone())
                }
                None if def.enabled => {
                    entries.insert(name.clone(), self.make_entry(def.clone()));
                    None
                }
                None => None,
            }
        };

        if let Some(controller) = controller {
            if old.requires_restart(&def) {
                info!(process = %name, "Definition changed, rolling restart");
                controller.rolling_restart(cancel).await?;
            } else if old.effective_scale() != def.effective_scale() {
                controller.set_desired_scale(def.effective_scale(), cancel).await?;
            }
        }
        Ok(())
    }

    /// Stop a process, drop its runtime, and forget its definition
    pub async fn delete_process(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        let entry = {
            let defs = self.defs.read().await;
            if !defs.contains_key(name) {
                return Err(DomainError::NotFound {
                    name: name.to_string(),
                });
            }
            drop(defs);
            let mut entries = self.entries.write().await;
            entries.remove(name)
        };

        if let Some(mut entry) = entry {
            entry.stop_health_monitor();
            match entry.controller.stop(cancel).await {
                Ok(()) | Err(DomainError::StateConflict { .. }) => {}
                Err(err) => {
                    warn!(process = %name, error = %err, "Stop during delete failed");
                }
            }
            entry.controller.close();
        }

        let mut defs = self.defs.write().await;
        defs.remove(name);
        // A deleted dependency leaves dangling edges; dependants keep
        // running but a reload will reject the config until it is fixed
        let entries = self.entries.read().await;
        metrics::set_manager_processes(entries.len());
        self.logs.forget_process(name);
        self.forget_sampled(name);
        info!(process = %name, "Process deleted");
        Ok(())
    }

    // ---- reload and save ---------------------------------------------

    /// Apply a freshly parsed definition map. Validation happens before
    /// any mutation; a rejected map changes nothing.
    pub async fn reload(
        &self,
        next: BTreeMap<String, Arc<ProcessDef>>,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        let _coordinator = self.coordinator.lock().await;
        config::validate_map(&next)?;

        let current = self.current_defs().await;
        let plan = reload_diff::compute_plan(&current, &next);
        if plan.is_empty() {
            info!("Reload: no changes");
            return Ok(());
        }
        info!(
            added = plan.added.len(),
            removed = plan.removed.len(),
            restarted = plan.restarted.len(),
            rescaled = plan.rescaled.len(),
            replaced = plan.replaced.len(),
            "Applying reload plan"
        );

        // Removed processes drain first, in reverse dependency order
        let stop_order = dependency_graph::stop_order(
            &current
                .iter()
                .filter(|(_, d)| d.enabled)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )?;
        for name in stop_order.iter().filter(|n| plan.removed.contains(*n)) {
            let entry = self.entries.write().await.remove(name);
            if let Some(mut entry) = entry {
                entry.stop_health_monitor();
                match entry.controller.stop(cancel).await {
                    Ok(()) | Err(DomainError::StateConflict { .. }) => {}
                    Err(err) => warn!(process = %name, error = %err, "Stop during reload failed"),
                }
                entry.controller.close();
            }
            self.logs.forget_process(name);
            self.forget_sampled(name);
        }

        // Definition swaps apply before any instance is touched
        {
            let mut entries = self.entries.write().await;
            for name in plan
                .replaced
                .iter()
                .chain(&plan.rescaled)
                .chain(&plan.restarted)
            {
                let def = next[name].clone();
                match entries.get_mut(name) {
                    Some(entry) if def.enabled => {
                        entry.controller.replace_def(def.clone());
                        if current[name].health_check != def.health_check {
                            self.refresh_health_monitor(entry, &def);
                        }
                    }
                    Some(_) => {
                        // disabled by this reload: treated as removal below
                    }
                    None if def.enabled => {
                        entries.insert(name.clone(), self.make_entry(def));
                    }
                    None => {}
                }
            }
        }

        // Processes disabled by the reload drain like removals
        for name in plan.replaced.iter().chain(&plan.rescaled).chain(&plan.restarted) {
            if !next[name].enabled {
                let entry = self.entries.write().await.remove(name);
                if let Some(mut entry) = entry {
                    entry.stop_health_monitor();
                    match entry.controller.stop(cancel).await {
                        Ok(()) | Err(DomainError::StateConflict { .. }) => {}
                        Err(err) => warn!(process = %name, error = %err, "Stop during reload failed"),
                    }
                    entry.controller.close();
                }
            }
        }

        // Instance work happens in dependency order
        let start_order = dependency_graph::start_order(
            &next
                .iter()
                .filter(|(_, d)| d.enabled)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )?;
        for name in &start_order {
            if plan.restarted.contains(name) && next[name].enabled {
                if let Ok(controller) = self.controller(name).await {
                    controller.rolling_restart(cancel).await?;
                }
            }
            if plan.rescaled.contains(name) && next[name].enabled {
                if let Ok(controller) = self.controller(name).await {
                    controller
                        .set_desired_scale(next[name].effective_scale(), cancel)
                        .await?;
                }
            }
            if plan.added.contains(name) {
                let def = next[name].clone();
                let controller = {
                    let mut entries = self.entries.write().await;
                    let entry = self.make_entry(def.clone());
                    let controller = entry.controller.clone();
                    entries.insert(name.clone(), entry);
                    controller
                };
                if let Err(err) = controller.start(TriggerKind::Dependency, cancel).await {
                    warn!(process = %name, error = %err, "Start of added process failed");
                }
            }
        }

        *self.defs.write().await = next;
        let entries = self.entries.read().await;
        metrics::set_manager_processes(entries.len());
        info!("Reload applied");
        Ok(())
    }

    /// Parse the config file and apply it
    pub async fn reload_from_disk(&self, cancel: &CancellationToken) -> Result<(), DomainError> {
        let next = config::load(&self.config_path)?;
        self.reload(next, cancel).await
    }

    /// Serialize the live definition map back to the config file
    pub async fn save(&self) -> Result<(), DomainError> {
        let defs = self.current_defs().await;
        config::save(&self.config_path, &defs)
    }

    /// Graceful manager shutdown: stop-all with a deadline, then tear the
    /// background tasks down and record how long the drain took
    pub async fn shutdown(&self, deadline: Option<Duration>) {
        let started = Instant::now();
        let cancel = CancellationToken::new();
        if let Err(err) = self.stop_all(&cancel, deadline).await {
            warn!(error = %err, "Shutdown drain incomplete");
        }
        self.cancel.cancel();
        if let Some(task) = self
            .collector_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        metrics::set_shutdown_seconds(started.elapsed());
        info!(elapsed_secs = started.elapsed().as_secs_f64(), "Scheduler shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ExitStatus, MockSpawner};
    use crate::domain::AggregateState;
    use std::collections::BTreeSet;

    fn def(name: &str, priority: i32, deps: &[&str]) -> Arc<ProcessDef> {
        let mut d = ProcessDef::test_def(name, &["/bin/sleep", "60"]);
        d.priority = priority;
        d.restart_delay_seconds = 0;
        d.stop_timeout_seconds = 1;
        d.depends_on = deps.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();
        Arc::new(d)
    }

    async fn scheduler_with(
        defs: Vec<Arc<ProcessDef>>,
    ) -> (Arc<SupervisionScheduler>, MockSpawner) {
        let spawner = MockSpawner::new();
        let map: BTreeMap<String, Arc<ProcessDef>> = defs
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        let scheduler = SupervisionScheduler::new(
            PathBuf::from("/tmp/phpeek-pm-test.yaml"),
            map,
            Arc::new(spawner.clone()),
            Arc::new(LogCollector::new()),
        )
        .await
        .unwrap();
        (scheduler, spawner)
    }

    async fn drain_stops(spawner: &MockSpawner, expect: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let mut delivered = 0;
        while delivered < expect {
            let signalled: Vec<u32> = spawner.signals().iter().map(|(pid, _)| *pid).collect();
            let live = spawner.live_pids();
            for pid in signalled {
                if live.contains(&pid) {
                    spawner.exit(pid, ExitStatus { code: None, signal: Some(libc::SIGTERM) });
                    delivered += 1;
                }
            }
            if delivered >= expect {
                return;
            }
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_all_obeys_dependency_order() {
        let (scheduler, spawner) =
            scheduler_with(vec![def("php-fpm", 10, &[]), def("nginx", 20, &["php-fpm"])]).await;
        let cancel = CancellationToken::new();
        scheduler.start_all(&cancel).await.unwrap();

        // both up, and php-fpm spawned before nginx
        let specs: Vec<String> = spawner
            .live_pids()
            .iter()
            .filter_map(|pid| spawner.spec_of(*pid))
            .map(|s| s.process)
            .collect();
        assert_eq!(specs.len(), 2);
        let snapshots = scheduler.list().await;
        assert!(snapshots.iter().all(|s| s.state == AggregateState::Running));

        let first_pid = spawner.live_pids()[0];
        assert_eq!(spawner.spec_of(first_pid).unwrap().process, "php-fpm");
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_and_describe() {
        let (scheduler, _spawner) = scheduler_with(vec![def("web", 0, &[])]).await;
        let snapshots = scheduler.list().await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name, "web");

        let (snapshot, def) = scheduler.describe("web").await.unwrap();
        assert_eq!(snapshot.name, "web");
        assert_eq!(def.command[0], "/bin/sleep");

        let err = scheduler.describe("ghost").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_duplicate_rejected() {
        let (scheduler, _spawner) = scheduler_with(vec![def("web", 0, &[])]).await;
        let err = scheduler
            .add_process((*def("web", 0, &[])).clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "already_exists");
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_with_missing_dependency_rejected() {
        let (scheduler, _spawner) = scheduler_with(vec![def("web", 0, &[])]).await;
        let err = scheduler
            .add_process((*def("worker", 0, &["ghost"])).clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "dependency_missing");
        // nothing changed
        assert_eq!(scheduler.list().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_stops_and_removes() {
        let (scheduler, spawner) = scheduler_with(vec![def("web", 0, &[])]).await;
        let cancel = CancellationToken::new();
        scheduler.start_all(&cancel).await.unwrap();
        assert_eq!(spawner.live_pids().len(), 1);

        let sched = scheduler.clone();
        let delete_cancel = cancel.clone();
        let delete = tokio::spawn(async move { sched.delete_process("web", &delete_cancel).await });
        drain_stops(&spawner, 1).await;
        delete.await.unwrap().unwrap();

        assert_eq!(scheduler.list().await.len(), 0);
        assert_eq!(
            scheduler.describe("web").await.unwrap_err().kind(),
            "not_found"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_scale_only_reconciles() {
        let (scheduler, spawner) = scheduler_with(vec![def("web", 0, &[])]).await;
        let cancel = CancellationToken::new();
        scheduler.start_all(&cancel).await.unwrap();

        let mut updated = (*def("web", 0, &[])).clone();
        updated.scale = 3;
        scheduler.update_process(updated, &cancel).await.unwrap();
        assert_eq!(spawner.live_pids().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_add_and_remove() {
        let (scheduler, spawner) = scheduler_with(vec![def("old", 0, &[])]).await;
        let cancel = CancellationToken::new();
        scheduler.start_all(&cancel).await.unwrap();

        let mut next = BTreeMap::new();
        next.insert("new".to_string(), def("new", 0, &[]));

        let sched = scheduler.clone();
        let reload_cancel = cancel.clone();
        let reload = tokio::spawn(async move { sched.reload(next, &reload_cancel).await });
        drain_stops(&spawner, 1).await;
        reload.await.unwrap().unwrap();

        let names: Vec<String> = scheduler.list().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["new"]);
        // the added process was started
        assert_eq!(spawner.live_pids().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_rejects_invalid_map_without_side_effects() {
        let (scheduler, spawner) = scheduler_with(vec![def("web", 0, &[])]).await;
        let cancel = CancellationToken::new();
        scheduler.start_all(&cancel).await.unwrap();

        let mut next = BTreeMap::new();
        next.insert("web".to_string(), def("web", 0, &["ghost"]));
        let err = scheduler.reload(next, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), "dependency_missing");

        // unchanged: still running, def intact
        assert_eq!(spawner.live_pids().len(), 1);
        let (_, def) = scheduler.describe("web").await.unwrap();
        assert!(def.depends_on.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_reverse_order_and_conflict_tolerance() {
        let (scheduler, spawner) =
            scheduler_with(vec![def("a", 0, &[]), def("b", 0, &["a"])]).await;
        let cancel = CancellationToken::new();
        scheduler.start_all(&cancel).await.unwrap();

        let sched = scheduler.clone();
        let stop_cancel = cancel.clone();
        let stop = tokio::spawn(async move { sched.stop_all(&stop_cancel, None).await });
        drain_stops(&spawner, 2).await;
        stop.await.unwrap().unwrap();

        // a second stop-all is a no-op, stopped processes are skipped
        scheduler.stop_all(&cancel, None).await.unwrap();
        assert!(spawner.live_pids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oneshot_history_recorded() {
        let mut oneshot = (*def("migrate", 0, &[])).clone();
        oneshot.process_type = crate::domain::ProcessType::Oneshot;
        let (scheduler, spawner) = scheduler_with(vec![Arc::new(oneshot)]).await;
        let cancel = CancellationToken::new();

        let sched = scheduler.clone();
        let start_cancel = cancel.clone();
        let start =
            tokio::spawn(async move { sched.start_process("migrate", &start_cancel).await });
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while spawner.live_pids().is_empty() {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        spawner.exit_all(ExitStatus { code: Some(0), signal: None });
        start.await.unwrap().unwrap();

        // collector task drains the channel
        tokio::time::sleep(Duration::from_millis(50)).await;
        let history = scheduler.oneshot_history(0);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].process, "migrate");
        assert_eq!(history[0].exit_code, Some(0));
    }
}
