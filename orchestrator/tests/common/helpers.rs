//! Test helpers and builder patterns for orchestrator tests

use orchestrator::traits::MockLocalLookup;
use orchestrator::{ConfidenceBandPolicy, EscalationSettings, ExecutionMode, LookupHit, QueryOrchestrator};
use chrono::Utc;
use shared::{
    get_json, keys, put_json, ConsensusStrategy, CoordinationStore, Heartbeat, MemoryStore, PollingAwaiter, QueryId,
    QueryJob, TierRequest, WorkerPlacement, WorkerStatus,
};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use worker::{SimulatedEngine, Worker, WorkerResult, WorkerSettings};

use super::fixtures::TestFixtures;

pub type TestOrchestrator = QueryOrchestrator<Arc<MemoryStore>, MockLocalLookup>;

/// Builder pattern for creating test orchestrators with sensible defaults
pub struct OrchestratorBuilder {
    store: Arc<MemoryStore>,
    settings: EscalationSettings,
    lookup: MockLocalLookup,
    policy: Option<ConfidenceBandPolicy>,
}

impl OrchestratorBuilder {
    /// Two remote tiers, local lookup that knows nothing
    pub fn new(store: Arc<MemoryStore>) -> Self {
        let mut lookup = MockLocalLookup::new();
        lookup.expect_lookup().returning(|_| None).times(0..);
        Self {
            store,
            settings: TestFixtures::two_tier_settings(),
            lookup,
            policy: None,
        }
    }

    pub fn with_settings(mut self, settings: EscalationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_consensus(mut self, strategy: ConsensusStrategy) -> Self {
        self.settings.consensus = strategy;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.settings.mode = mode;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.settings.retention = retention;
        self
    }

    /// Override one remote tier's timeout (1-based)
    pub fn with_tier_timeout(mut self, tier: usize, timeout_ms: u64) -> Self {
        self.settings.tiers[tier - 1].timeout_ms = timeout_ms;
        self
    }

    /// Local lookup answers every query with this confidence
    pub fn with_local_hit(mut self, answer: &str, confidence: f64) -> Self {
        let answer = answer.to_string();
        self.lookup = MockLocalLookup::new();
        self.lookup.expect_lookup().returning(move |_| {
            Some(LookupHit {
                answer: answer.clone(),
                confidence,
                fact_ids: vec!["fact:1".to_string()],
            })
        });
        self
    }

    /// Ask `extra` more tiers when a rejected answer falls in `[low, high)`
    pub fn with_band_policy(mut self, low: f64, high: f64, extra: usize) -> Self {
        self.policy = Some(ConfidenceBandPolicy::new(low, high).with_extra_tiers(extra));
        self
    }

    pub fn build(self) -> TestOrchestrator {
        let orchestrator = QueryOrchestrator::new(self.store, self.lookup, self.settings)
            .with_awaiter(PollingAwaiter::new(Duration::from_millis(5)));
        match self.policy {
            Some(policy) => orchestrator.with_policy(policy),
            None => orchestrator,
        }
    }
}

/// A worker task running against the test store
pub struct RunningWorker {
    handle: JoinHandle<WorkerResult<()>>,
    shutdown: mpsc::Sender<()>,
}

impl RunningWorker {
    /// Stop the worker and wait for it to deregister
    pub async fn stop(self) {
        let _ = self.shutdown.send(()).await;
        self.handle.await.unwrap().unwrap();
    }
}

/// Helper functions for common test operations
pub struct TestHelpers;

impl TestHelpers {
    pub fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    /// Engine that always answers with `confidence` after `latency_ms`
    pub fn engine(name: &str, confidence: f64, latency_ms: u64) -> SimulatedEngine {
        SimulatedEngine::new(name, confidence).with_latency(Duration::from_millis(latency_ms))
    }

    pub fn spawn_worker(store: &Arc<MemoryStore>, tier: usize, engine_name: &str, engine: SimulatedEngine) -> RunningWorker {
        let settings = WorkerSettings::new(engine_name)
            .with_capabilities([tier])
            .with_poll_interval(Duration::from_millis(5))
            .with_heartbeat_interval(Duration::from_millis(50));
        let mut worker = Worker::new(settings, store.clone(), engine);
        let shutdown = worker.shutdown_sender();
        let handle = tokio::spawn(async move { worker.run().await });
        RunningWorker { handle, shutdown }
    }

    /// Worker answering tier `tier` with a fixed confidence and no delay
    pub fn answering(store: &Arc<MemoryStore>, tier: usize, engine_name: &str, confidence: f64) -> RunningWorker {
        Self::spawn_worker(store, tier, engine_name, Self::engine(engine_name, confidence, 0))
    }

    pub async fn request(store: &MemoryStore, query_id: &QueryId, tier: usize) -> Option<TierRequest> {
        get_json(store, &keys::tier_request(query_id, tier)).await.unwrap()
    }

    pub async fn pending(store: &MemoryStore, query_id: &QueryId) -> HashSet<String> {
        store.members(&keys::pending(query_id)).await.unwrap()
    }

    pub async fn job(store: &MemoryStore, query_id: &QueryId) -> QueryJob {
        get_json(store, &keys::query_state(query_id)).await.unwrap().unwrap()
    }

    pub async fn queue(store: &MemoryStore, engine: &str) -> HashSet<String> {
        store.members(&keys::work_queue(engine)).await.unwrap()
    }

    pub async fn events(orchestrator: &TestOrchestrator, query_id: &QueryId) -> Vec<String> {
        orchestrator
            .feed()
            .query_timeline(&query_id.to_string())
            .await
            .unwrap()
            .into_iter()
            .map(|event| event.event)
            .collect()
    }

    /// A registered worker whose last heartbeat is `age` old and that never answers
    pub async fn register_hung_worker(store: &MemoryStore, name: &str, tier: usize, age: chrono::Duration) {
        store.add_to_set(keys::REGISTERED_WORKERS, name).await.unwrap();
        store.set_value(&keys::worker_alive(name), "true").await.unwrap();
        put_json(store, &keys::worker_capabilities(name), &BTreeSet::from([tier])).await.unwrap();
        let heartbeat = Heartbeat {
            timestamp: Utc::now() - age,
            status: WorkerStatus::Processing,
            load: 1.0,
            current_job: None,
            placement: WorkerPlacement::Remote { host: "gpu-box".to_string(), port: 9000 },
        };
        put_json(store, &keys::worker_heartbeat(name), &heartbeat).await.unwrap();
    }
}
