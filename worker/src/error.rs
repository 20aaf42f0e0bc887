//! Worker error types

use shared::SharedError;
use thiserror::Error;

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Engine {engine} failed: {reason}")]
    EngineFailed { engine: String, reason: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Shared component error: {0}")]
    SharedError(#[from] SharedError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl WorkerError {
    pub fn engine(engine: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EngineFailed { engine: engine.into(), reason: reason.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError { message: message.into() }
    }

    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::SharedError(e) if e.is_unavailable())
    }
}
