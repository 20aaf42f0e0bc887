//! Service-specific tests
//!
//! Each service has its own test file; shared fixtures live in `common`.

mod event_feed;

pub mod common {
    use chrono::{DateTime, Duration, Utc};
    use shared::{keys, put_json, CoordinationStore, Heartbeat, MemoryStore, WorkerPlacement, WorkerStatus};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    pub fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    /// Fixed reference instant so tests can reason about ages
    pub fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    pub fn after(ms: i64) -> DateTime<Utc> {
        t0() + Duration::milliseconds(ms)
    }

    /// Write what a self-registering worker writes about itself
    pub async fn write_heartbeat(
        store: &MemoryStore,
        name: &str,
        at: DateTime<Utc>,
        status: WorkerStatus,
        capabilities: &[usize],
    ) {
        store.add_to_set(keys::REGISTERED_WORKERS, name).await.unwrap();
        store.set_value(&keys::worker_alive(name), "true").await.unwrap();
        store.set_value(&keys::worker_status(name), status.as_str()).await.unwrap();
        let capabilities: BTreeSet<usize> = capabilities.iter().copied().collect();
        put_json(store, &keys::worker_capabilities(name), &capabilities).await.unwrap();
        let heartbeat = Heartbeat {
            timestamp: at,
            status,
            load: 0.25,
            current_job: None,
            placement: WorkerPlacement::Remote { host: "gpu-box".to_string(), port: 9000 },
        };
        put_json(store, &keys::worker_heartbeat(name), &heartbeat).await.unwrap();
    }
}
