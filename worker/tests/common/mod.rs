//! Common test utilities for worker tests

use chrono::Utc;
use shared::{keys, put_json, CoordinationStore, MemoryStore, QueryId, TierRequest};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use worker::WorkerSettings;

pub const ENGINE: &str = "fast";

pub fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

pub fn settings() -> WorkerSettings {
    WorkerSettings::new(ENGINE)
        .with_capabilities([1])
        .with_poll_interval(Duration::from_millis(5))
        .with_heartbeat_interval(Duration::from_millis(20))
}

pub fn request(tier: usize, timeout_ms: u64) -> TierRequest {
    TierRequest {
        query_id: QueryId::new(),
        tier,
        engine: ENGINE.to_string(),
        query: "how far is the moon".to_string(),
        context: HashMap::new(),
        created_at: Utc::now(),
        timeout_ms,
    }
}

/// Publish a request the way the orchestrator does
pub async fn publish(store: &MemoryStore, request: &TierRequest) {
    put_json(store, &keys::tier_request(&request.query_id, request.tier), request)
        .await
        .unwrap();
    store.add_to_set(&keys::pending(&request.query_id), &request.engine).await.unwrap();
    store
        .add_to_set(&keys::work_queue(&request.engine), &request.work_item().to_string())
        .await
        .unwrap();
}

/// Poll until `key` has a value or `within` elapses
pub async fn wait_for_value(store: &MemoryStore, key: &str, within: Duration) -> Option<String> {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if let Some(value) = store.get_value(key).await.unwrap() {
            return Some(value);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    None
}
