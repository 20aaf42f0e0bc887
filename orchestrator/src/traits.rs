//! Collaborator traits injected into the orchestrator
//!
//! Each seam that touches something outside the escalation logic (the local
//! knowledge source, child processes, query classification, second-opinion
//! decisions) is a trait so tests can substitute mocks or fixed policies.

use async_trait::async_trait;
use shared::TierResult;

use crate::config::WorkerConfig;
use crate::error::OrchestratorResult;

/// Answer produced by the local lookup
#[derive(Debug, Clone, PartialEq)]
pub struct LookupHit {
    pub answer: String,
    pub confidence: f64,
    /// Identifiers of the facts that produced the answer
    pub fact_ids: Vec<String>,
}

/// Tier 0: an in-process lookup that costs nothing to ask
///
/// `None` means the source has nothing to say about the query at all.
#[mockall::automock]
#[async_trait]
pub trait LocalLookup: Send + Sync {
    async fn lookup(&self, query: &str) -> Option<LookupHit>;
}

/// Assigns an optional category to a query, used by category-aware consensus
pub trait QueryClassifier: Send + Sync {
    fn classify(&self, query: &str) -> Option<String>;
}

/// What a second-opinion policy gets to look at
#[derive(Debug, Clone, Copy)]
pub struct OpinionRequest<'a> {
    pub tier: usize,
    pub result: &'a TierResult,
    pub category: Option<&'a str>,
    /// Tiers not yet attempted, cheapest first
    pub remaining: &'a [usize],
}

/// Decides whether a non-accepted answer deserves more opinions before escalating
pub trait SecondOpinionPolicy: Send + Sync {
    /// Tiers to consult in addition to the one that just answered; empty means escalate
    fn extra_tiers(&self, request: &OpinionRequest<'_>) -> Vec<usize>;
}

/// Child process supervision for locally placed workers
#[mockall::automock]
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Start the worker process, returning its PID
    async fn spawn_worker(&self, worker: &WorkerConfig) -> OrchestratorResult<u32>;

    /// Whether the process is still running (false for unknown workers)
    async fn is_running(&self, name: &str) -> OrchestratorResult<bool>;

    /// Stop one worker, gracefully first
    async fn stop_worker(&self, name: &str) -> OrchestratorResult<()>;

    async fn stop_all(&self) -> OrchestratorResult<()>;
}
