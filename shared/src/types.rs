//! Core types used throughout the tiered resolution system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::errors::SharedError;

/// Global process ID singleton - set once at startup
static PROCESS_ID: OnceLock<ProcessId> = OnceLock::new();

/// Identity reported when no binary entry point initialized the process ID
static EMBEDDED: ProcessId = ProcessId::Embedded;

/// Process identifier for any component in the system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessId {
    /// Orchestrator process driving query escalation
    Orchestrator,
    /// Worker process serving one engine
    Worker(String),
    /// Process hosting the networked coordination store
    StoreServer,
    /// Library use without a binary entry point (tests, embedding)
    Embedded,
}

impl ProcessId {
    /// Initialize the global process ID for orchestrator
    pub fn init_orchestrator() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Orchestrator)
    }

    /// Initialize the global process ID for a worker
    pub fn init_worker(name: &str) -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Worker(name.to_string()))
    }

    /// Initialize the global process ID for the store server
    pub fn init_store_server() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::StoreServer)
    }

    /// Get the global process ID, or `Embedded` when none was initialized
    pub fn current() -> &'static ProcessId {
        PROCESS_ID.get().unwrap_or(&EMBEDDED)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Orchestrator => write!(f, "orchestrator"),
            ProcessId::Worker(name) => write!(f, "worker_{name}"),
            ProcessId::StoreServer => write!(f, "storeserver"),
            ProcessId::Embedded => write!(f, "embedded"),
        }
    }
}

/// Unique identifier for a query job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(Uuid);

impl QueryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Why a query left a tier without accepting its answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    TimedOut,
    LowConfidence,
    WorkerDead,
    Refused,
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EscalationReason::TimedOut => "timed_out",
            EscalationReason::LowConfidence => "low_confidence",
            EscalationReason::WorkerDead => "worker_dead",
            EscalationReason::Refused => "refused",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of a query job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueryState {
    Received,
    Tier0Attempt,
    Escalating { from_tier: usize, reason: EscalationReason },
    Waiting { tier: usize },
    Accepted { tier: usize },
    Complete,
    FailedSoft,
}

impl QueryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryState::Complete | QueryState::FailedSoft)
    }
}

/// How a final answer was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ResolutionMethod {
    LocalLookup,
    Tier { tier: usize, engine: String },
    Consensus { strategy: ConsensusStrategy, engines: Vec<String> },
    Exhausted,
    StoreUnavailable,
}

impl ResolutionMethod {
    pub fn is_soft_failure(&self) -> bool {
        matches!(self, ResolutionMethod::Exhausted | ResolutionMethod::StoreUnavailable)
    }
}

/// Answer returned to whoever submitted the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub query_id: QueryId,
    pub answer: String,
    pub confidence: f64,
    pub method: ResolutionMethod,
    pub provenance: Vec<String>,
    pub tiers_attempted: Vec<usize>,
}

impl Resolution {
    /// Clarification answer used whenever no tier produced an accepted result
    pub const FALLBACK_ANSWER: &'static str =
        "I couldn't find a reliable answer to that. Could you rephrase or add more detail?";

    /// Zero-confidence answer for exhausted escalation or an unreachable store
    pub fn soft_failure(query_id: QueryId, method: ResolutionMethod, tiers_attempted: Vec<usize>) -> Self {
        Self {
            query_id,
            answer: Self::FALLBACK_ANSWER.to_string(),
            confidence: 0.0,
            method,
            provenance: Vec::new(),
            tiers_attempted,
        }
    }
}

/// One incoming query and its lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryJob {
    pub id: QueryId,
    pub query: String,
    pub state: QueryState,
    pub submitted_at: DateTime<Utc>,
    pub current_tier: usize,
    pub result: Option<Resolution>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl QueryJob {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: QueryId::new(),
            query: query.into(),
            state: QueryState::Received,
            submitted_at: Utc::now(),
            current_tier: 0,
            result: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Worker lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Unregistered,
    Starting,
    Idle,
    Processing,
    Error,
    Dead,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Unregistered => "unregistered",
            WorkerStatus::Starting => "starting",
            WorkerStatus::Idle => "idle",
            WorkerStatus::Processing => "processing",
            WorkerStatus::Error => "error",
            WorkerStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unregistered" => Ok(WorkerStatus::Unregistered),
            "starting" => Ok(WorkerStatus::Starting),
            "idle" => Ok(WorkerStatus::Idle),
            "processing" => Ok(WorkerStatus::Processing),
            "error" => Ok(WorkerStatus::Error),
            "dead" => Ok(WorkerStatus::Dead),
            other => Err(SharedError::InvalidConfig {
                field: "worker_status".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Where a worker runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerPlacement {
    Local { pid: Option<u32> },
    Remote { host: String, port: u16 },
}

/// Liveness record a worker writes about itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
    pub status: WorkerStatus,
    pub load: f64,
    pub current_job: Option<String>,
    pub placement: WorkerPlacement,
}

/// Everything known about one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub name: String,
    pub placement: WorkerPlacement,
    pub capabilities: BTreeSet<usize>,
    pub alive: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub status: WorkerStatus,
    pub current_job: Option<String>,
    pub load: f64,
}

impl WorkerRecord {
    pub fn new(name: impl Into<String>, placement: WorkerPlacement, capabilities: BTreeSet<usize>) -> Self {
        Self {
            name: name.into(),
            placement,
            capabilities,
            alive: false,
            last_heartbeat: None,
            status: WorkerStatus::Unregistered,
            current_job: None,
            load: 0.0,
        }
    }

    pub fn serves(&self, tier: usize) -> bool {
        self.capabilities.contains(&tier)
    }

    pub fn is_local(&self) -> bool {
        matches!(self.placement, WorkerPlacement::Local { .. })
    }
}

/// Severity of a diagnostic event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventLevel::Debug => "debug",
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for EventLevel {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" | "trace" => Ok(EventLevel::Debug),
            "info" => Ok(EventLevel::Info),
            "warn" | "warning" => Ok(EventLevel::Warn),
            "error" => Ok(EventLevel::Error),
            other => Err(SharedError::InvalidConfig {
                field: "diagnostic_level".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Structured detail fields attached to a diagnostic event
pub type EventDetails = serde_json::Map<String, serde_json::Value>;

/// Immutable, timestamped record in a query's diagnostic timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub query_id: String,
    pub event: String,
    pub details: EventDetails,
}

/// Voting strategy used to combine several tier results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsensusStrategy {
    PassThrough,
    SimpleAverage,
    WeightedAverage,
    WeightedByCategory,
}

impl Default for ConsensusStrategy {
    fn default() -> Self {
        ConsensusStrategy::PassThrough
    }
}

impl fmt::Display for ConsensusStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConsensusStrategy::PassThrough => "pass-through",
            ConsensusStrategy::SimpleAverage => "simple-average",
            ConsensusStrategy::WeightedAverage => "weighted-average",
            ConsensusStrategy::WeightedByCategory => "weighted-by-category",
        };
        f.write_str(s)
    }
}

impl FromStr for ConsensusStrategy {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "pass-through" | "unanimous-pass-through" | "passthrough" => Ok(ConsensusStrategy::PassThrough),
            "simple-average" | "average" => Ok(ConsensusStrategy::SimpleAverage),
            "weighted-average" | "weighted" => Ok(ConsensusStrategy::WeightedAverage),
            "weighted-by-category" => Ok(ConsensusStrategy::WeightedByCategory),
            other => Err(SharedError::InvalidConfig {
                field: "consensus_strategy".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Whether an engine's answer was later judged correct
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackObservation {
    pub engine: String,
    pub correct: bool,
    pub category: Option<String>,
}
