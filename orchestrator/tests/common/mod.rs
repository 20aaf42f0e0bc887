//! Common test utilities and infrastructure
//!
//! Shared fixtures, an orchestrator builder, and helpers that run real
//! workers against an in-memory coordination store.

#![allow(dead_code)]

pub mod fixtures;
pub mod helpers;

// Re-export commonly used items for convenience
pub use fixtures::TestFixtures;
pub use helpers::{OrchestratorBuilder, RunningWorker, TestHelpers};
