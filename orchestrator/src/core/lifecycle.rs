//! Worker lifecycle state machine
//!
//! ```text
//! Unregistered -> Starting -> Idle <-> Processing
//!                    ^          |          |
//!                    |          v          v
//!                    +------- Error ----> Dead
//! ```
//!
//! Failures move a restartable worker to `Error` with a scheduled restart;
//! once the retry budget is spent, or for workers we cannot restart, they
//! move to `Dead`. A fresh heartbeat from an `Error` or `Dead` worker means
//! it came back on its own and re-enters through `Starting`.

use chrono::{DateTime, Duration, Utc};
use shared::WorkerStatus;

/// Restart budget for one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub auto_restart: bool,
    pub max_retries: u32,
    /// Delay before the first restart, doubled for each later one
    pub backoff: Duration,
}

impl RestartPolicy {
    pub fn never() -> Self {
        Self { auto_restart: false, max_retries: 0, backoff: Duration::zero() }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerLifecycle {
    state: WorkerStatus,
    /// Whether this process can respawn the worker (local placement)
    restartable: bool,
    policy: RestartPolicy,
    restart_attempts: u32,
    next_restart_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    died_at: Option<DateTime<Utc>>,
}

impl WorkerLifecycle {
    pub fn new(restartable: bool, policy: RestartPolicy) -> Self {
        Self {
            state: WorkerStatus::Unregistered,
            restartable,
            policy,
            restart_attempts: 0,
            next_restart_at: None,
            started_at: None,
            died_at: None,
        }
    }

    pub fn state(&self) -> WorkerStatus {
        self.state
    }

    pub fn restart_attempts(&self) -> u32 {
        self.restart_attempts
    }

    pub fn next_restart_at(&self) -> Option<DateTime<Utc>> {
        self.next_restart_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn died_at(&self) -> Option<DateTime<Utc>> {
        self.died_at
    }

    /// Running as far as we know: started and not failed
    pub fn is_live(&self) -> bool {
        matches!(self.state, WorkerStatus::Starting | WorkerStatus::Idle | WorkerStatus::Processing)
    }

    fn allowed(from: WorkerStatus, to: WorkerStatus) -> bool {
        use WorkerStatus::*;
        from == to
            || matches!(
                (from, to),
                (Unregistered, Starting)
                    | (Starting, Idle | Processing | Error | Dead)
                    | (Idle, Processing | Error | Dead)
                    | (Processing, Idle | Error | Dead)
                    | (Error, Starting | Dead)
                    | (Dead, Starting)
            )
    }

    /// Apply a transition, returning false when the edge does not exist
    pub fn transition(&mut self, to: WorkerStatus) -> bool {
        if !Self::allowed(self.state, to) {
            return false;
        }
        self.state = to;
        true
    }

    /// The process was launched (first start or restart)
    pub fn on_spawned(&mut self, now: DateTime<Utc>) -> bool {
        if !self.transition(WorkerStatus::Starting) {
            return false;
        }
        self.started_at = Some(now);
        self.next_restart_at = None;
        true
    }

    /// A heartbeat reporting `reported` arrived
    pub fn on_heartbeat(&mut self, reported: WorkerStatus, now: DateTime<Utc>) -> WorkerStatus {
        if reported == WorkerStatus::Error {
            return self.on_reported_error(now);
        }
        let reported = match reported {
            WorkerStatus::Processing => WorkerStatus::Processing,
            _ => WorkerStatus::Idle,
        };

        if matches!(self.state, WorkerStatus::Unregistered | WorkerStatus::Error | WorkerStatus::Dead) {
            self.transition(WorkerStatus::Starting);
            self.started_at.get_or_insert(now);
            self.next_restart_at = None;
            self.died_at = None;
        }
        self.transition(reported);
        self.state
    }

    /// Heartbeat expired or the process exited
    pub fn on_failure(&mut self, now: DateTime<Utc>) -> WorkerStatus {
        if matches!(self.state, WorkerStatus::Dead | WorkerStatus::Unregistered) {
            return self.state;
        }
        if self.can_restart() {
            self.schedule_restart(now);
        } else {
            self.mark_dead(now);
        }
        self.state
    }

    /// The worker itself says it is in error but is still heartbeating
    fn on_reported_error(&mut self, now: DateTime<Utc>) -> WorkerStatus {
        if !self.is_live() {
            return self.state;
        }
        if self.can_restart() {
            self.schedule_restart(now);
        } else {
            self.transition(WorkerStatus::Error);
        }
        self.state
    }

    /// Whether a scheduled restart should run now
    pub fn restart_due(&self, now: DateTime<Utc>) -> bool {
        self.state == WorkerStatus::Error && self.next_restart_at.is_some_and(|at| at <= now)
    }

    /// Consume one attempt from the budget before respawning
    pub fn begin_restart(&mut self) -> u32 {
        self.restart_attempts += 1;
        self.next_restart_at = None;
        self.restart_attempts
    }

    /// The respawn itself failed
    pub fn on_restart_failed(&mut self, now: DateTime<Utc>) -> WorkerStatus {
        if self.can_restart() {
            self.schedule_restart(now);
        } else {
            self.mark_dead(now);
        }
        self.state
    }

    /// Manual intervention: forget failures and start over
    pub fn reset(&mut self) {
        self.state = WorkerStatus::Unregistered;
        self.restart_attempts = 0;
        self.next_restart_at = None;
        self.started_at = None;
        self.died_at = None;
    }

    fn can_restart(&self) -> bool {
        self.restartable && self.policy.auto_restart && self.restart_attempts < self.policy.max_retries
    }

    /// Backoff before the next attempt: base * 2^attempts so far
    pub fn backoff_delay(&self) -> Duration {
        let factor = 1_i32.checked_shl(self.restart_attempts.min(16)).unwrap_or(i32::MAX);
        self.policy.backoff * factor
    }

    fn schedule_restart(&mut self, now: DateTime<Utc>) {
        self.transition(WorkerStatus::Error);
        self.next_restart_at = Some(now + self.backoff_delay());
    }

    fn mark_dead(&mut self, now: DateTime<Utc>) {
        if self.transition(WorkerStatus::Dead) {
            self.died_at = Some(now);
            self.next_restart_at = None;
        }
    }
}
