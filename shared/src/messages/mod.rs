//! Messages exchanged between processes
//!
//! - `tier`: the worker wire contract (requests published by the orchestrator,
//!   results published by workers), carried as JSON values in the store
//! - `store`: the framed request/response protocol spoken to the store server

pub mod store;
pub mod tier;

pub use store::{StoreRequest, StoreResponse};
pub use tier::{TierRequest, TierResult, WorkItem};
