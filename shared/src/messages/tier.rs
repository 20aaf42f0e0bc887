//! Orchestrator ↔ Worker wire contract

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::SharedError;
use crate::types::QueryId;

/// Work published by the orchestrator for one (query, tier) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRequest {
    pub query_id: QueryId,
    pub tier: usize,
    pub engine: String,
    pub query: String,
    pub context: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub timeout_ms: u64,
}

impl TierRequest {
    /// Whether the orchestrator has already stopped waiting for this request
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let elapsed = now.signed_duration_since(self.created_at);
        elapsed.num_milliseconds() > self.timeout_ms as i64
    }

    pub fn work_item(&self) -> WorkItem {
        WorkItem { query_id: self.query_id, tier: self.tier }
    }
}

/// Answer published by the worker that claimed a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierResult {
    pub engine: String,
    pub answer: String,
    pub confidence: f64,
    pub latency_ms: u64,
    pub completed_at: DateTime<Utc>,
    pub provenance: Vec<String>,
}

impl TierResult {
    pub fn new(engine: impl Into<String>, answer: impl Into<String>, confidence: f64, latency_ms: u64) -> Self {
        Self {
            engine: engine.into(),
            answer: answer.into(),
            confidence,
            latency_ms,
            completed_at: Utc::now(),
            provenance: Vec::new(),
        }
    }

    /// Attach provenance entries (fluent API)
    pub fn with_provenance(mut self, provenance: Vec<String>) -> Self {
        self.provenance = provenance;
        self
    }

    /// Result written when an engine tried and failed, distinguishing it from never running
    pub fn refusal(engine: impl Into<String>, reason: impl fmt::Display, latency_ms: u64) -> Self {
        Self {
            engine: engine.into(),
            answer: String::new(),
            confidence: 0.0,
            latency_ms,
            completed_at: Utc::now(),
            provenance: vec![format!("error: {reason}")],
        }
    }

    pub fn is_refusal(&self) -> bool {
        self.confidence <= 0.0
    }

    /// Confidence is a probability; anything else is a broken engine
    pub fn has_valid_confidence(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence)
    }
}

/// Queue entry pointing a worker at a published request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub query_id: QueryId,
    pub tier: usize,
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.query_id, self.tier)
    }
}

impl FromStr for WorkItem {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, tier) = s
            .rsplit_once(':')
            .ok_or_else(|| SharedError::protocol(format!("Malformed work item: {s}")))?;
        let query_id = id
            .parse()
            .map_err(|e| SharedError::protocol(format!("Malformed query id in work item {s}: {e}")))?;
        let tier = tier
            .parse()
            .map_err(|e| SharedError::protocol(format!("Malformed tier in work item {s}: {e}")))?;
        Ok(Self { query_id, tier })
    }
}
