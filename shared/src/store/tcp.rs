//! Networked coordination store client

use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::CoordinationStore;
use crate::errors::{SharedError, SharedResult};
use crate::messages::store::{read_frame, write_frame, StoreRequest, StoreResponse};
use crate::process_debug;
use crate::types::ProcessId;

/// Client for a `StoreServer`, one request per round trip over a persistent connection
///
/// Any connect, I/O or timeout failure drops the connection and surfaces as
/// `StoreUnavailable`; the next call reconnects.
pub struct TcpStore {
    address: String,
    connection: Mutex<Option<TcpStream>>,
    io_timeout: Duration,
}

impl TcpStore {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn new(host: &str, port: u16) -> Self {
        Self {
            address: format!("{host}:{port}"),
            connection: Mutex::new(None),
            io_timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Configure the per-request timeout (fluent API)
    pub fn with_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Check the server answers at all
    pub async fn ping(&self) -> SharedResult<()> {
        match self.call(StoreRequest::Ping).await? {
            StoreResponse::Ok => Ok(()),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn connect(&self) -> SharedResult<TcpStream> {
        let stream = tokio::time::timeout(self.io_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| SharedError::unavailable(format!("Connect to {} timed out", self.address)))?
            .map_err(|e| SharedError::unavailable(format!("Connect failed to {}: {e}", self.address)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| SharedError::unavailable(format!("Socket setup failed: {e}")))?;
        process_debug!(ProcessId::current(), "🔌 Connected to coordination store at {}", self.address);
        Ok(stream)
    }

    async fn call(&self, request: StoreRequest) -> SharedResult<StoreResponse> {
        let mut connection = self.connection.lock().await;
        if connection.is_none() {
            *connection = Some(self.connect().await?);
        }
        let Some(stream) = connection.as_mut() else {
            return Err(SharedError::unavailable("No connection to store"));
        };

        let exchange = async {
            write_frame(&mut *stream, &request).await?;
            read_frame::<_, StoreResponse>(&mut *stream).await
        };

        let outcome = match tokio::time::timeout(self.io_timeout, exchange).await {
            Ok(Ok(Some(response))) => Ok(response),
            Ok(Ok(None)) => Err(SharedError::unavailable("Store closed the connection")),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SharedError::unavailable(format!(
                "Request to {} timed out after {:?}",
                self.address, self.io_timeout
            ))),
        };

        match outcome {
            Ok(StoreResponse::Error(message)) => Err(SharedError::protocol(message)),
            Ok(response) => Ok(response),
            Err(e) => {
                // The stream may hold half a frame; start fresh next time
                *connection = None;
                Err(e)
            }
        }
    }

    fn unexpected(response: StoreResponse) -> SharedError {
        SharedError::protocol(format!("Unexpected store response: {response:?}"))
    }
}

#[async_trait]
impl CoordinationStore for TcpStore {
    async fn set_value(&self, key: &str, value: &str) -> SharedResult<()> {
        let request = StoreRequest::SetValue { key: key.to_string(), value: value.to_string() };
        match self.call(request).await? {
            StoreResponse::Ok => Ok(()),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn get_value(&self, key: &str) -> SharedResult<Option<String>> {
        match self.call(StoreRequest::GetValue { key: key.to_string() }).await? {
            StoreResponse::Value(value) => Ok(value),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn delete(&self, key: &str) -> SharedResult<()> {
        match self.call(StoreRequest::Delete { key: key.to_string() }).await? {
            StoreResponse::Ok => Ok(()),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn add_to_set(&self, key: &str, member: &str) -> SharedResult<bool> {
        let request = StoreRequest::AddToSet { key: key.to_string(), member: member.to_string() };
        match self.call(request).await? {
            StoreResponse::Flag(added) => Ok(added),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> SharedResult<bool> {
        let request = StoreRequest::RemoveFromSet { key: key.to_string(), member: member.to_string() };
        match self.call(request).await? {
            StoreResponse::Flag(removed) => Ok(removed),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn members(&self, key: &str) -> SharedResult<HashSet<String>> {
        match self.call(StoreRequest::Members { key: key.to_string() }).await? {
            StoreResponse::Members(members) => Ok(members.into_iter().collect()),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn append_to_log(&self, key: &str, entry: &str) -> SharedResult<()> {
        let request = StoreRequest::AppendToLog { key: key.to_string(), entry: entry.to_string() };
        match self.call(request).await? {
            StoreResponse::Ok => Ok(()),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn read_log(&self, key: &str) -> SharedResult<Vec<String>> {
        match self.call(StoreRequest::ReadLog { key: key.to_string() }).await? {
            StoreResponse::Log(entries) => Ok(entries),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> SharedResult<()> {
        let request = StoreRequest::SetExpiry { key: key.to_string(), ttl_ms: ttl.as_millis() as u64 };
        match self.call(request).await? {
            StoreResponse::Ok => Ok(()),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn increment(&self, key: &str, by: i64) -> SharedResult<i64> {
        match self.call(StoreRequest::Increment { key: key.to_string(), by }).await? {
            StoreResponse::Counter(value) => Ok(value),
            other => Err(Self::unexpected(other)),
        }
    }
}
