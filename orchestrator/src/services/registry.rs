//! Worker registry and health monitor
//!
//! Knows every worker (static configuration merged with self-registrations in
//! the store), starts local ones, and sweeps liveness periodically. A worker
//! whose heartbeat is older than the grace window, or whose local process has
//! exited, is marked dead and every query waiting on it is told so it can
//! escalate immediately. Local workers are restarted with exponential backoff
//! until their retry budget runs out.

use chrono::{DateTime, Utc};
use serde_json::json;
use shared::{
    get_json, keys, logging, process_debug, process_error, process_info, process_warn, CoordinationStore,
    EventLevel, Heartbeat, ProcessId, QueryId, WorkerPlacement, WorkerRecord, WorkerStatus,
};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;

use super::event_feed::{details, EventFeed};
use crate::config::{OrchestratorConfig, WorkerConfig, WorkerKind};
use crate::core::{RestartPolicy, WorkerLifecycle};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::ProcessManager;

struct WorkerEntry {
    record: WorkerRecord,
    lifecycle: WorkerLifecycle,
    /// Present for statically configured workers
    config: Option<WorkerConfig>,
    /// Timestamp of the newest heartbeat already applied
    last_seen: Option<DateTime<Utc>>,
}

impl WorkerEntry {
    fn from_config(config: &WorkerConfig) -> Self {
        let placement = match &config.kind {
            WorkerKind::Local { .. } => WorkerPlacement::Local { pid: None },
            WorkerKind::Remote { host, port } => WorkerPlacement::Remote { host: host.clone(), port: *port },
        };
        let policy = RestartPolicy {
            auto_restart: config.auto_restart,
            max_retries: config.max_retries,
            backoff: chrono::Duration::milliseconds(config.backoff_ms as i64),
        };
        Self {
            record: WorkerRecord::new(config.name.clone(), placement, config.capabilities.clone()),
            lifecycle: WorkerLifecycle::new(config.is_local(), policy),
            config: Some(config.clone()),
            last_seen: None,
        }
    }

    fn self_registered(name: &str) -> Self {
        Self {
            record: WorkerRecord::new(
                name,
                WorkerPlacement::Remote { host: "unknown".to_string(), port: 0 },
                BTreeSet::new(),
            ),
            lifecycle: WorkerLifecycle::new(false, RestartPolicy::never()),
            config: None,
            last_seen: None,
        }
    }

    fn local_config(&self) -> Option<&WorkerConfig> {
        self.config.as_ref().filter(|config| config.is_local())
    }

    fn snapshot(&self) -> WorkerRecord {
        let mut record = self.record.clone();
        record.status = self.lifecycle.state();
        record
    }
}

/// What one sweep changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub marked_dead: Vec<String>,
    pub restarted: Vec<String>,
    /// Queries told that an engine they wait on died
    pub notified_queries: usize,
}

pub struct WorkerRegistry<S, P> {
    store: S,
    processes: P,
    feed: EventFeed<S>,
    workers: Mutex<HashMap<String, WorkerEntry>>,
    grace: chrono::Duration,
    sweep_interval: Duration,
}

impl<S, P> WorkerRegistry<S, P>
where
    S: CoordinationStore + Clone,
    P: ProcessManager,
{
    pub fn new(store: S, processes: P, config: &OrchestratorConfig) -> Self {
        let workers = config
            .workers
            .iter()
            .map(|worker| (worker.name.clone(), WorkerEntry::from_config(worker)))
            .collect();
        Self {
            feed: EventFeed::new(store.clone(), config.diagnostics.level),
            store,
            processes,
            workers: Mutex::new(workers),
            grace: chrono::Duration::milliseconds(config.health.grace_ms as i64),
            sweep_interval: Duration::from_millis(config.health.sweep_interval_ms),
        }
    }

    /// Spawn every local worker that has not been started yet
    pub async fn start_local_workers(&self) -> OrchestratorResult<Vec<String>> {
        let now = Utc::now();
        let mut workers = self.workers.lock().await;
        let mut started = Vec::new();

        for (name, entry) in workers.iter_mut() {
            if entry.lifecycle.state() != WorkerStatus::Unregistered {
                continue;
            }
            let Some(config) = entry.local_config().cloned() else {
                continue;
            };

            match self.processes.spawn_worker(&config).await {
                Ok(pid) => {
                    entry.lifecycle.on_spawned(now);
                    entry.record.placement = WorkerPlacement::Local { pid: Some(pid) };
                    started.push(name.clone());
                }
                Err(e) => {
                    logging::log_error(ProcessId::current(), &format!("Starting worker {name}"), &e);
                    // A failed first launch is retried like a crash
                    entry.lifecycle.on_spawned(now);
                    entry.lifecycle.on_failure(now);
                }
            }
        }
        Ok(started)
    }

    /// One liveness pass: refresh from the store, detect failures, run due restarts
    pub async fn sweep(&self, now: DateTime<Utc>) -> OrchestratorResult<SweepReport> {
        let mut workers = self.workers.lock().await;
        self.refresh(&mut workers, now).await?;

        let mut report = SweepReport::default();
        for (name, entry) in workers.iter_mut() {
            if entry.lifecycle.is_live() {
                if let Some(reason) = self.failure_reason(name, entry, now).await? {
                    report.notified_queries += self.mark_dead(name, &reason).await?;
                    entry.record.alive = false;
                    let state = entry.lifecycle.on_failure(now);
                    report.marked_dead.push(name.clone());
                    process_warn!(ProcessId::current(), "💀 Worker {} failed ({}), now {}", name, reason, state);
                }
            }

            if entry.lifecycle.restart_due(now) {
                if let Some(config) = entry.local_config().cloned() {
                    if self.restart(name, entry, &config, now).await {
                        report.restarted.push(name.clone());
                    }
                }
            }
        }
        Ok(report)
    }

    async fn failure_reason(
        &self,
        name: &str,
        entry: &WorkerEntry,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<Option<String>> {
        if entry.local_config().is_some() && !self.processes.is_running(name).await? {
            return Ok(Some("process exited".to_string()));
        }

        // A restart resets the clock even though the old heartbeat is still stored
        let reference = match (entry.last_seen, entry.lifecycle.started_at()) {
            (Some(seen), Some(started)) => Some(seen.max(started)),
            (seen, started) => seen.or(started),
        };
        if let Some(seen) = reference {
            let age = now.signed_duration_since(seen);
            if age > self.grace {
                return Ok(Some(format!("no heartbeat for {}ms", age.num_milliseconds())));
            }
        }
        Ok(None)
    }

    async fn restart(&self, name: &str, entry: &mut WorkerEntry, config: &WorkerConfig, now: DateTime<Utc>) -> bool {
        let attempt = entry.lifecycle.begin_restart();
        process_info!(
            ProcessId::current(),
            "🔄 Restarting worker {} (attempt {}/{})",
            name,
            attempt,
            config.max_retries
        );

        match self.processes.spawn_worker(config).await {
            Ok(pid) => {
                entry.lifecycle.on_spawned(now);
                entry.record.placement = WorkerPlacement::Local { pid: Some(pid) };
                true
            }
            Err(e) => {
                logging::log_error(ProcessId::current(), &format!("Restarting worker {name}"), &e);
                if entry.lifecycle.on_restart_failed(now) == WorkerStatus::Dead {
                    process_error!(
                        ProcessId::current(),
                        "❌ Worker {} is permanently unavailable after {} attempts",
                        name,
                        attempt
                    );
                }
                false
            }
        }
    }

    /// Merge self-registrations and apply any new heartbeats
    async fn refresh(&self, workers: &mut HashMap<String, WorkerEntry>, now: DateTime<Utc>) -> OrchestratorResult<()> {
        for name in self.store.members(keys::REGISTERED_WORKERS).await? {
            workers.entry(name.clone()).or_insert_with(|| {
                process_info!(ProcessId::current(), "👋 Discovered self-registered worker {}", name);
                WorkerEntry::self_registered(&name)
            });
        }

        for (name, entry) in workers.iter_mut() {
            if let Some(capabilities) = get_json::<_, BTreeSet<usize>>(&self.store, &keys::worker_capabilities(name)).await? {
                entry.record.capabilities = capabilities;
            }
            entry.record.alive = self.store.get_value(&keys::worker_alive(name)).await?.as_deref() == Some("true");

            let Some(heartbeat) = get_json::<_, Heartbeat>(&self.store, &keys::worker_heartbeat(name)).await? else {
                continue;
            };
            if entry.last_seen.is_some_and(|seen| heartbeat.timestamp <= seen) {
                continue;
            }

            entry.last_seen = Some(heartbeat.timestamp);
            entry.record.last_heartbeat = Some(heartbeat.timestamp);
            entry.record.load = heartbeat.load;
            entry.record.current_job = heartbeat.current_job.clone();
            if entry.config.is_none() {
                entry.record.placement = heartbeat.placement.clone();
            }

            // Age is measured from when the worker spoke, not from when we noticed
            let before = entry.lifecycle.state();
            let after = entry.lifecycle.on_heartbeat(heartbeat.status, heartbeat.timestamp.min(now));
            entry.record.status = after;
            if before != after {
                process_debug!(ProcessId::current(), "💓 Worker {}: {} -> {}", name, before, after);
            }
        }
        Ok(())
    }

    /// Record the death in the store and notify every query waiting on the worker
    pub async fn mark_dead(&self, name: &str, reason: &str) -> OrchestratorResult<usize> {
        self.store.set_value(&keys::worker_alive(name), "false").await?;
        self.store.set_value(&keys::worker_status(name), WorkerStatus::Dead.as_str()).await?;

        let mut notified = 0;
        for query in self.store.members(&keys::worker_assigned(name)).await? {
            let Ok(query_id) = query.parse::<QueryId>() else {
                process_warn!(ProcessId::current(), "⚠️ Ignoring malformed assignment {} on {}", query, name);
                continue;
            };
            self.store.add_to_set(&keys::dead_engines(&query_id), name).await?;
            self.feed
                .log_event(
                    &query,
                    "worker_dead",
                    EventLevel::Warn,
                    details(json!({ "worker": name, "reason": reason })),
                )
                .await;
            notified += 1;
        }
        Ok(notified)
    }

    /// Manual intervention: clear the failure history and start the worker again
    pub async fn reset_worker(&self, name: &str) -> OrchestratorResult<()> {
        let mut workers = self.workers.lock().await;
        let entry = workers
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::UnknownWorker { worker: name.to_string() })?;

        entry.lifecycle.reset();
        process_info!(ProcessId::current(), "🔧 Worker {} reset", name);

        if let Some(config) = entry.local_config().cloned() {
            let now = Utc::now();
            let pid = self.processes.spawn_worker(&config).await?;
            entry.lifecycle.on_spawned(now);
            entry.record.placement = WorkerPlacement::Local { pid: Some(pid) };
        }
        Ok(())
    }

    /// Run sweeps until a shutdown signal arrives
    pub async fn run(&self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(self.sweep_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep(Utc::now()).await {
                        Ok(report) if !report.marked_dead.is_empty() || !report.restarted.is_empty() => {
                            process_info!(
                                ProcessId::current(),
                                "🩺 Sweep: dead {:?}, restarted {:?}, {} queries notified",
                                report.marked_dead,
                                report.restarted,
                                report.notified_queries
                            );
                        }
                        Ok(_) => {}
                        Err(e) => logging::log_error(ProcessId::current(), "Health sweep", &e),
                    }
                }
                _ = shutdown.recv() => {
                    process_debug!(ProcessId::current(), "🛑 Health monitor stopping");
                    break;
                }
            }
        }
    }

    /// Stop every local worker process
    pub async fn stop_all(&self) -> OrchestratorResult<()> {
        self.processes.stop_all().await
    }

    pub async fn snapshot(&self) -> Vec<WorkerRecord> {
        let workers = self.workers.lock().await;
        let mut records: Vec<WorkerRecord> = workers.values().map(WorkerEntry::snapshot).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub async fn status(&self, name: &str) -> Option<WorkerStatus> {
        self.workers.lock().await.get(name).map(|entry| entry.lifecycle.state())
    }

    pub async fn restart_attempts(&self, name: &str) -> Option<u32> {
        self.workers.lock().await.get(name).map(|entry| entry.lifecycle.restart_attempts())
    }

    /// Live workers declaring `tier` as a capability
    pub async fn workers_serving(&self, tier: usize) -> Vec<String> {
        let workers = self.workers.lock().await;
        let mut names: Vec<String> = workers
            .iter()
            .filter(|(_, entry)| entry.lifecycle.is_live() && entry.record.serves(tier))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}
