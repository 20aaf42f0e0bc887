//! Worker trait definitions for dependency injection

use async_trait::async_trait;
use shared::TierRequest;

use crate::error::WorkerResult;

/// What an engine produced for one request
#[derive(Debug, Clone, PartialEq)]
pub struct EngineAnswer {
    pub answer: String,
    pub confidence: f64,
    pub provenance: Vec<String>,
}

/// The model (or anything else) that turns a query into an answer
///
/// Errors are reported to the orchestrator as zero-confidence results.
#[mockall::automock]
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn infer(&self, request: &TierRequest) -> WorkerResult<EngineAnswer>;
}
