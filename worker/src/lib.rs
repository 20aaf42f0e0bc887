//! Worker library for the tiered query resolution system
//!
//! A worker serves one engine: it registers in the coordination store,
//! heartbeats, claims requests from its engine's work queue and publishes
//! answers for the orchestrator to pick up.

pub mod core;
pub mod error;
pub mod services;
pub mod traits;
pub mod types;

pub use crate::core::{parse_capabilities, Worker};
pub use error::{WorkerError, WorkerResult};
pub use services::SimulatedEngine;
pub use traits::{EngineAnswer, InferenceEngine};
pub use types::{Activity, WorkerSettings};
