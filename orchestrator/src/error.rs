//! Orchestrator-specific error types

use shared::SharedError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Aggregation called with no results")]
    NoResults,

    #[error("Tier {tier} ({engine}) timed out after {timeout:?}")]
    TierTimeout { tier: usize, engine: String, timeout: Duration },

    #[error("Worker {worker} is dead")]
    WorkerDead { worker: String },

    #[error("Failed to spawn worker process: {worker}: {reason}")]
    WorkerSpawnFailed { worker: String, reason: String },

    #[error("Unknown worker: {worker}")]
    UnknownWorker { worker: String },

    #[error("Configuration error: {field}")]
    ConfigurationError { field: String },

    #[error("Process management error: {message}")]
    ProcessError { message: String },

    #[error("Shared component error: {0}")]
    SharedError(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config file parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl OrchestratorError {
    pub fn config(field: impl Into<String>) -> Self {
        Self::ConfigurationError { field: field.into() }
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::ProcessError { message: message.into() }
    }

    /// Whether the coordination store could not be reached
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::SharedError(e) if e.is_unavailable())
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
