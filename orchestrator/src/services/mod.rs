//! Service implementations
//!
//! Components that talk to the coordination store or to child processes.

pub mod event_feed;
pub mod feedback;
pub mod process_manager;
pub mod process_output_handler;
pub mod registry;

#[cfg(test)]
mod tests;

pub use event_feed::{details, EventFeed};
pub use process_manager::RealProcessManager;
pub use process_output_handler::OutputMode;
pub use registry::{SweepReport, WorkerRegistry};
