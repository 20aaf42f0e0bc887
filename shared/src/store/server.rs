//! TCP host for a memory store

use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

use super::{CoordinationStore, MemoryStore};
use crate::errors::SharedResult;
use crate::messages::store::{read_frame, write_frame, StoreRequest, StoreResponse};
use crate::types::ProcessId;
use crate::{process_debug, process_warn};

/// Serves `StoreRequest` frames against a shared `MemoryStore`
pub struct StoreServer {
    store: Arc<MemoryStore>,
}

impl StoreServer {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Accept connections until the listener fails
    pub async fn serve(self, listener: TcpListener) -> SharedResult<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    process_warn!(ProcessId::current(), "⚠️ Accept failed: {}", e);
                    continue;
                }
            };

            process_debug!(ProcessId::current(), "🔗 Store client connected from {}", peer);
            let store = self.store.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(store, stream).await {
                    process_debug!(ProcessId::current(), "🔌 Store client {} dropped: {}", peer, e);
                }
            });
        }
    }

    /// Periodically evict expired keys so abandoned queries do not accumulate
    pub fn spawn_expiry_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let evicted = store.purge_expired().await;
                if evicted > 0 {
                    process_debug!(ProcessId::current(), "🧹 Evicted {} expired keys", evicted);
                }
            }
        })
    }

    async fn handle_connection(store: Arc<MemoryStore>, mut stream: TcpStream) -> SharedResult<()> {
        while let Some(request) = read_frame::<_, StoreRequest>(&mut stream).await? {
            let response = Self::dispatch(store.as_ref(), request).await;
            write_frame(&mut stream, &response).await?;
        }
        Ok(())
    }

    /// Apply one request to the store
    pub async fn dispatch(store: &MemoryStore, request: StoreRequest) -> StoreResponse {
        let outcome = match request {
            StoreRequest::Ping => Ok(StoreResponse::Ok),
            StoreRequest::SetValue { key, value } => store.set_value(&key, &value).await.map(|_| StoreResponse::Ok),
            StoreRequest::GetValue { key } => store.get_value(&key).await.map(StoreResponse::Value),
            StoreRequest::Delete { key } => store.delete(&key).await.map(|_| StoreResponse::Ok),
            StoreRequest::AddToSet { key, member } => store.add_to_set(&key, &member).await.map(StoreResponse::Flag),
            StoreRequest::RemoveFromSet { key, member } => {
                store.remove_from_set(&key, &member).await.map(StoreResponse::Flag)
            }
            StoreRequest::Members { key } => store
                .members(&key)
                .await
                .map(|members| StoreResponse::Members(members.into_iter().collect())),
            StoreRequest::AppendToLog { key, entry } => {
                store.append_to_log(&key, &entry).await.map(|_| StoreResponse::Ok)
            }
            StoreRequest::ReadLog { key } => store.read_log(&key).await.map(StoreResponse::Log),
            StoreRequest::SetExpiry { key, ttl_ms } => store
                .set_expiry(&key, Duration::from_millis(ttl_ms))
                .await
                .map(|_| StoreResponse::Ok),
            StoreRequest::Increment { key, by } => store.increment(&key, by).await.map(StoreResponse::Counter),
        };

        outcome.unwrap_or_else(|e| StoreResponse::Error(e.to_string()))
    }
}
