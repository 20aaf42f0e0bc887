//! Orchestrator library for tiered query resolution
//!
//! Resolves natural-language queries by trying a local fact lookup first and
//! escalating through progressively more expensive worker tiers until an answer
//! clears its tier's confidence threshold. Workers are coordinated purely
//! through the shared coordination store; this crate also supervises their
//! health and restarts the ones it launched.

pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod traits;

// Re-export commonly used types
pub use config::{ExecutionMode, OrchestratorConfig, TierConfig, WorkerConfig, WorkerKind};
pub use core::{ConfidenceBandPolicy, KeywordClassifier, KeywordFactIndex, NoSecondOpinion, WeightTable};
pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::{EscalationSettings, QueryOrchestrator};
pub use services::{EventFeed, RealProcessManager, WorkerRegistry};
pub use traits::{LocalLookup, LookupHit, OpinionRequest, ProcessManager, QueryClassifier, SecondOpinionPolicy};
