//! Diagnostic event feed and metrics
//!
//! Events go to the query's timeline in the store and are mirrored to tracing.
//! Nothing here ever fails a query: store errors are logged and swallowed.

use chrono::Utc;
use serde_json::{Map, Value};
use shared::{
    keys, process_debug, process_error, process_info, process_warn, CoordinationStore, DiagnosticEvent,
    EventDetails, EventLevel, ProcessId,
};

use crate::error::OrchestratorResult;

/// Turn a `json!({...})` object into event details
pub fn details(value: Value) -> EventDetails {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

#[derive(Clone)]
pub struct EventFeed<S> {
    store: S,
    min_level: EventLevel,
}

impl<S: CoordinationStore> EventFeed<S> {
    pub fn new(store: S, min_level: EventLevel) -> Self {
        Self { store, min_level }
    }

    pub fn min_level(&self) -> EventLevel {
        self.min_level
    }

    /// Record an event for `query_id`
    pub async fn log_event(&self, query_id: &str, event: &str, level: EventLevel, details: EventDetails) {
        let record = DiagnosticEvent {
            timestamp: Utc::now(),
            level,
            query_id: query_id.to_string(),
            event: event.to_string(),
            details,
        };
        Self::mirror(&record);

        if level < self.min_level {
            return;
        }
        let encoded = match serde_json::to_string(&record) {
            Ok(encoded) => encoded,
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ Could not encode event {}: {}", event, e);
                return;
            }
        };
        if let Err(e) = self.store.append_to_log(&keys::diagnostics(query_id), &encoded).await {
            process_warn!(
                ProcessId::current(),
                "⚠️ Diagnostics write failed for query {} ({}): {}",
                query_id,
                event,
                e
            );
        }
    }

    /// Ordered timeline of a query; undecodable entries are skipped
    pub async fn query_timeline(&self, query_id: &str) -> OrchestratorResult<Vec<DiagnosticEvent>> {
        let raw = self.store.read_log(&keys::diagnostics(query_id)).await?;
        let mut events = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<DiagnosticEvent>(&entry) {
                Ok(event) => events.push(event),
                Err(e) => {
                    process_warn!(ProcessId::current(), "⚠️ Skipping bad timeline entry for {}: {}", query_id, e);
                }
            }
        }
        Ok(events)
    }

    pub async fn increment_metric(&self, name: &str) {
        if let Err(e) = self.store.increment(&keys::metric(name), 1).await {
            process_warn!(ProcessId::current(), "⚠️ Metric {} not recorded: {}", name, e);
        }
    }

    pub async fn record_latency(&self, engine: &str, latency_ms: u64) {
        if let Err(e) = self
            .store
            .append_to_log(&keys::latency_samples(engine), &latency_ms.to_string())
            .await
        {
            process_warn!(ProcessId::current(), "⚠️ Latency sample for {} not recorded: {}", engine, e);
        }
    }

    /// Current value of a counter (0 when never incremented)
    pub async fn metric(&self, name: &str) -> OrchestratorResult<i64> {
        Ok(self.store.increment(&keys::metric(name), 0).await?)
    }

    fn mirror(record: &DiagnosticEvent) {
        let details = Value::Object(record.details.clone());
        match record.level {
            EventLevel::Debug => {
                process_debug!(ProcessId::current(), "🔎 [{}] {} {}", record.query_id, record.event, details);
            }
            EventLevel::Info => {
                process_info!(ProcessId::current(), "📋 [{}] {} {}", record.query_id, record.event, details);
            }
            EventLevel::Warn => {
                process_warn!(ProcessId::current(), "⚠️ [{}] {} {}", record.query_id, record.event, details);
            }
            EventLevel::Error => {
                process_error!(ProcessId::current(), "❌ [{}] {} {}", record.query_id, record.event, details);
            }
        }
    }
}
