//! Worker-specific types

use shared::{WorkerPlacement, WorkerStatus};
use std::collections::BTreeSet;
use std::time::Duration;

/// Identity and pacing of one worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    /// Worker name; also the engine name requests are addressed to
    pub name: String,
    /// Remote tiers this worker serves
    pub capabilities: BTreeSet<usize>,
    pub placement: WorkerPlacement,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl WorkerSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: BTreeSet::new(),
            placement: WorkerPlacement::Local { pid: Some(std::process::id()) },
            poll_interval: Duration::from_millis(10),
            heartbeat_interval: Duration::from_millis(500),
        }
    }

    /// Configure served tiers (fluent API)
    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = usize>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    /// Configure where the worker runs (fluent API)
    pub fn with_placement(mut self, placement: WorkerPlacement) -> Self {
        self.placement = placement;
        self
    }

    /// Configure queue polling pace (fluent API)
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Configure heartbeat pace (fluent API)
    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }
}

/// What the worker is doing right now, as reported in heartbeats
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub status: WorkerStatus,
    pub current_job: Option<String>,
    pub handled: u64,
}

impl Activity {
    pub fn starting() -> Self {
        Self { status: WorkerStatus::Starting, current_job: None, handled: 0 }
    }

    pub fn load(&self) -> f64 {
        if self.current_job.is_some() {
            1.0
        } else {
            0.0
        }
    }
}
