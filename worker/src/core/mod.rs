//! Core worker logic

pub mod queue;
pub mod worker;

pub use queue::{claimable, parse_capabilities};
pub use worker::Worker;
