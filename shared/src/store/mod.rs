//! Coordination store abstraction
//!
//! A flat key-value/set/log backend with single-key atomicity. Components get
//! a store injected; nothing reaches for a process-wide handle.

pub mod memory;
pub mod server;
pub mod tcp;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::SharedResult;

pub use memory::MemoryStore;
pub use server::StoreServer;
pub use tcp::TcpStore;

/// Shared key-value store used for all cross-process coordination
///
/// Every operation is atomic for its key. `add_to_set` and `remove_from_set`
/// report whether this caller changed the set, which is what makes work
/// claims exclusive.
#[mockall::automock]
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn set_value(&self, key: &str, value: &str) -> SharedResult<()>;

    async fn get_value(&self, key: &str) -> SharedResult<Option<String>>;

    async fn delete(&self, key: &str) -> SharedResult<()>;

    /// Returns true when the member was not already present
    async fn add_to_set(&self, key: &str, member: &str) -> SharedResult<bool>;

    /// Returns true when this call removed the member
    async fn remove_from_set(&self, key: &str, member: &str) -> SharedResult<bool>;

    async fn members(&self, key: &str) -> SharedResult<HashSet<String>>;

    async fn append_to_log(&self, key: &str, entry: &str) -> SharedResult<()>;

    async fn read_log(&self, key: &str) -> SharedResult<Vec<String>>;

    /// Missing keys are left alone
    async fn set_expiry(&self, key: &str, ttl: Duration) -> SharedResult<()>;

    async fn increment(&self, key: &str, by: i64) -> SharedResult<i64>;
}

#[async_trait]
impl<S: CoordinationStore + ?Sized> CoordinationStore for Arc<S> {
    async fn set_value(&self, key: &str, value: &str) -> SharedResult<()> {
        (**self).set_value(key, value).await
    }

    async fn get_value(&self, key: &str) -> SharedResult<Option<String>> {
        (**self).get_value(key).await
    }

    async fn delete(&self, key: &str) -> SharedResult<()> {
        (**self).delete(key).await
    }

    async fn add_to_set(&self, key: &str, member: &str) -> SharedResult<bool> {
        (**self).add_to_set(key, member).await
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> SharedResult<bool> {
        (**self).remove_from_set(key, member).await
    }

    async fn members(&self, key: &str) -> SharedResult<HashSet<String>> {
        (**self).members(key).await
    }

    async fn append_to_log(&self, key: &str, entry: &str) -> SharedResult<()> {
        (**self).append_to_log(key, entry).await
    }

    async fn read_log(&self, key: &str) -> SharedResult<Vec<String>> {
        (**self).read_log(key).await
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> SharedResult<()> {
        (**self).set_expiry(key, ttl).await
    }

    async fn increment(&self, key: &str, by: i64) -> SharedResult<i64> {
        (**self).increment(key, by).await
    }
}

/// Store a structured value as JSON
pub async fn put_json<S, T>(store: &S, key: &str, value: &T) -> SharedResult<()>
where
    S: CoordinationStore + ?Sized,
    T: Serialize + Sync,
{
    let encoded = serde_json::to_string(value)?;
    store.set_value(key, &encoded).await
}

/// Read a structured JSON value
pub async fn get_json<S, T>(store: &S, key: &str) -> SharedResult<Option<T>>
where
    S: CoordinationStore + ?Sized,
    T: DeserializeOwned,
{
    match store.get_value(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// What a waiter is watching for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultWatch {
    /// Key the result will be written to
    pub result_key: String,
    /// Set the health monitor adds the engine to when it dies
    pub dead_key: String,
    /// Engine owing the result
    pub engine: String,
    /// Liveness flag of the engine; `"false"` means nobody will answer
    pub alive_key: Option<String>,
}

/// Outcome of waiting for a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Awaited {
    Ready(String),
    TimedOut,
    /// The serving engine was reported dead before answering
    Abandoned,
}

/// Bounded wait for a value to appear in the store
#[async_trait]
pub trait ResultAwaiter: Send + Sync {
    async fn await_result(
        &self,
        store: &dyn CoordinationStore,
        watch: &ResultWatch,
        timeout: Duration,
    ) -> SharedResult<Awaited>;
}

/// Waits by re-reading the store on a fixed interval
#[derive(Debug, Clone, Copy)]
pub struct PollingAwaiter {
    interval: Duration,
}

impl PollingAwaiter {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(10);

    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for PollingAwaiter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}

#[async_trait]
impl ResultAwaiter for PollingAwaiter {
    async fn await_result(
        &self,
        store: &dyn CoordinationStore,
        watch: &ResultWatch,
        timeout: Duration,
    ) -> SharedResult<Awaited> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // A result that landed just before a death report still wins
            if let Some(value) = store.get_value(&watch.result_key).await? {
                return Ok(Awaited::Ready(value));
            }
            if store.members(&watch.dead_key).await?.contains(&watch.engine) {
                return Ok(Awaited::Abandoned);
            }
            if let Some(alive_key) = &watch.alive_key {
                if store.get_value(alive_key).await?.as_deref() == Some("false") {
                    return Ok(Awaited::Abandoned);
                }
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Awaited::TimedOut);
            }
            tokio::time::sleep(self.interval.min(deadline - now)).await;
        }
    }
}
