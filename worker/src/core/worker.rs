//! Worker implementation
//!
//! A worker registers itself in the coordination store, heartbeats on a
//! fixed interval, and polls its engine's work queue. Claiming is an atomic
//! removal from the queue, so exactly one worker handles each published
//! request. Before running the engine the worker checks it is still listed
//! as pending for the query; requests the orchestrator escalated past are
//! dropped without an answer.

use chrono::Utc;
use shared::{
    get_json, keys, logging, process_debug, process_info, process_warn, put_json, CoordinationStore, Heartbeat,
    ProcessId, TierRequest, TierResult, WorkItem, WorkerStatus,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;

use super::queue::claimable;
use crate::error::{WorkerError, WorkerResult};
use crate::traits::InferenceEngine;
use crate::types::{Activity, WorkerSettings};

pub struct Worker<S, E>
where
    S: CoordinationStore + Clone + 'static,
    E: InferenceEngine + 'static,
{
    settings: WorkerSettings,

    // Injected services
    store: S,
    engine: Arc<E>,

    // Runtime state, shared with the heartbeat task
    activity: Arc<RwLock<Activity>>,

    // Control channels
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Option<mpsc::Receiver<()>>,
}

impl<S, E> Worker<S, E>
where
    S: CoordinationStore + Clone + 'static,
    E: InferenceEngine + 'static,
{
    pub fn new(settings: WorkerSettings, store: S, engine: E) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            settings,
            store,
            engine: Arc::new(engine),
            activity: Arc::new(RwLock::new(Activity::starting())),
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn shutdown_sender(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub async fn activity(&self) -> Activity {
        self.activity.read().await.clone()
    }

    /// Announce the worker and its capabilities
    pub async fn register(&self) -> WorkerResult<()> {
        let name = &self.settings.name;
        self.store.add_to_set(keys::REGISTERED_WORKERS, name).await?;
        put_json(&self.store, &keys::worker_capabilities(name), &self.settings.capabilities).await?;

        self.activity.write().await.status = WorkerStatus::Idle;
        self.heartbeat().await?;

        process_info!(
            ProcessId::current(),
            "👋 Registered worker {} serving tiers {:?}",
            name,
            self.settings.capabilities
        );
        Ok(())
    }

    pub async fn heartbeat(&self) -> WorkerResult<()> {
        publish_heartbeat(&self.store, &self.settings, &self.activity).await
    }

    /// Mark the worker as gone so nobody waits on it
    pub async fn deregister(&self) -> WorkerResult<()> {
        let name = &self.settings.name;
        self.store.set_value(&keys::worker_alive(name), "false").await?;
        self.store.set_value(&keys::worker_status(name), WorkerStatus::Idle.as_str()).await?;
        process_info!(ProcessId::current(), "👋 Worker {} deregistered", name);
        Ok(())
    }

    /// Claim and handle at most one queued request
    ///
    /// Returns the work item that was claimed, if any.
    pub async fn work_once(&self) -> WorkerResult<Option<WorkItem>> {
        let Some((item, request)) = self.claim().await? else {
            return Ok(None);
        };

        if !self.still_wanted(&request).await? {
            process_debug!(
                ProcessId::current(),
                "🗑️ Dropping {}: the query no longer waits on {}",
                item,
                self.settings.name
            );
            return Ok(Some(item));
        }

        self.execute(&item, request).await?;
        Ok(Some(item))
    }

    /// Atomically take the first request this worker may serve
    async fn claim(&self) -> WorkerResult<Option<(WorkItem, TierRequest)>> {
        let queue = keys::work_queue(&self.settings.name);
        let members = self.store.members(&queue).await?;

        for item in claimable(members, &self.settings.capabilities) {
            if !self.store.remove_from_set(&queue, &item.to_string()).await? {
                // Another worker got there first
                continue;
            }
            match get_json::<_, TierRequest>(&self.store, &keys::tier_request(&item.query_id, item.tier)).await? {
                Some(request) => return Ok(Some((item, request))),
                None => {
                    process_warn!(ProcessId::current(), "⚠️ Claimed {} but its request is gone", item);
                }
            }
        }
        Ok(None)
    }

    async fn still_wanted(&self, request: &TierRequest) -> WorkerResult<bool> {
        if request.is_expired(Utc::now()) {
            return Ok(false);
        }
        self.still_pending(request).await
    }

    async fn still_pending(&self, request: &TierRequest) -> WorkerResult<bool> {
        let pending = self.store.members(&keys::pending(&request.query_id)).await?;
        Ok(pending.contains(&self.settings.name))
    }

    /// Run the engine within the request's remaining budget and publish the answer
    async fn execute(&self, item: &WorkItem, request: TierRequest) -> WorkerResult<()> {
        let name = self.settings.name.clone();
        {
            let mut activity = self.activity.write().await;
            activity.status = WorkerStatus::Processing;
            activity.current_job = Some(item.to_string());
        }

        let elapsed = Utc::now().signed_duration_since(request.created_at).num_milliseconds().max(0) as u64;
        let budget = Duration::from_millis(request.timeout_ms.saturating_sub(elapsed));
        let started = Instant::now();
        let outcome = tokio::time::timeout(budget, self.engine.infer(&request)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(answer)) => {
                let result =
                    TierResult::new(&name, answer.answer, answer.confidence, latency_ms).with_provenance(answer.provenance);
                if result.has_valid_confidence() {
                    Some(result)
                } else {
                    process_warn!(ProcessId::current(), "⚠️ {} reported confidence {} for {}", name, result.confidence, item);
                    Some(TierResult::refusal(
                        &name,
                        format!("confidence {} outside [0, 1]", result.confidence),
                        latency_ms,
                    ))
                }
            }
            Ok(Err(e)) => {
                logging::log_error(ProcessId::current(), &format!("Inference for {item}"), &e);
                Some(TierResult::refusal(&name, e, latency_ms))
            }
            Err(_) => {
                process_warn!(ProcessId::current(), "⏰ {} ran past its {:?} budget; not answering", item, budget);
                None
            }
        };

        let published = match result {
            Some(result) => self.publish(&request, &result).await,
            None => Ok(()),
        };

        {
            let mut activity = self.activity.write().await;
            activity.status = WorkerStatus::Idle;
            activity.current_job = None;
            activity.handled += 1;
        }
        published
    }

    /// Result first, then leave the pending set
    ///
    /// Nothing is written once the orchestrator has moved on: its cleanup
    /// would never expire a result that lands after it.
    async fn publish(&self, request: &TierRequest, result: &TierResult) -> WorkerResult<()> {
        if !self.still_pending(request).await? {
            process_debug!(
                ProcessId::current(),
                "🗑️ Discarding late answer for {}: no longer pending",
                request.work_item()
            );
            return Ok(());
        }
        put_json(&self.store, &keys::tier_result(&request.query_id, request.tier), result).await?;
        self.store
            .remove_from_set(&keys::pending(&request.query_id), &self.settings.name)
            .await?;
        process_debug!(
            ProcessId::current(),
            "📤 Answered {} with confidence {:.2} in {}ms",
            request.work_item(),
            result.confidence,
            result.latency_ms
        );
        Ok(())
    }

    fn start_heartbeat(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let settings = self.settings.clone();
        let activity = self.activity.clone();

        tokio::spawn(async move {
            let mut ticker = interval(settings.heartbeat_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = publish_heartbeat(&store, &settings, &activity).await {
                    process_warn!(ProcessId::current(), "⚠️ Heartbeat failed: {}", e);
                }
            }
        })
    }

    /// Register, serve the queue until shutdown, then deregister
    pub async fn run(&mut self) -> WorkerResult<()> {
        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .ok_or_else(|| WorkerError::config("worker is already running"))?;

        self.register().await?;
        let heartbeat = self.start_heartbeat();
        let mut poll = interval(self.settings.poll_interval);

        loop {
            tokio::select! {
                Some(_) = shutdown_rx.recv() => {
                    process_info!(ProcessId::current(), "🛑 Shutting down worker {}...", self.settings.name);
                    break;
                }
                _ = poll.tick() => {
                    if let Err(e) = self.work_once().await {
                        logging::log_error(ProcessId::current(), "Serving work queue", &e);
                    }
                }
            }
        }

        heartbeat.abort();
        self.deregister().await
    }
}

async fn publish_heartbeat<S>(store: &S, settings: &WorkerSettings, activity: &RwLock<Activity>) -> WorkerResult<()>
where
    S: CoordinationStore + ?Sized,
{
    let activity = activity.read().await.clone();
    let name = &settings.name;
    let heartbeat = Heartbeat {
        timestamp: Utc::now(),
        status: activity.status,
        load: activity.load(),
        current_job: activity.current_job.clone(),
        placement: settings.placement.clone(),
    };

    store.set_value(&keys::worker_alive(name), "true").await?;
    store.set_value(&keys::worker_status(name), activity.status.as_str()).await?;
    store.set_value(&keys::worker_load(name), &heartbeat.load.to_string()).await?;
    put_json(store, &keys::worker_heartbeat(name), &heartbeat).await?;
    Ok(())
}
