//! Shared types for the tiered query resolution system
//!
//! Contains what more than one process needs: the data model, the
//! coordination store and its key schema, the worker wire contract, and
//! process-aware logging.

pub mod errors;
pub mod keys;
pub mod logging;
pub mod messages;
pub mod store;
pub mod types;

pub use errors::*;
pub use types::*;

pub use messages::{StoreRequest, StoreResponse, TierRequest, TierResult, WorkItem};
pub use store::{
    get_json, put_json, Awaited, CoordinationStore, MemoryStore, PollingAwaiter, ResultAwaiter, ResultWatch,
    StoreServer, TcpStore,
};
