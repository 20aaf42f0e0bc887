//! Core business logic modules
//!
//! Pure decision logic with no store or process I/O: acceptance rules, tier
//! planning, consensus math, worker lifecycle transitions and the built-in
//! lookup and classification collaborators.

pub mod classifier;
pub mod consensus;
pub mod escalation;
pub mod lifecycle;
pub mod lookup;
pub mod policy;
pub mod weights;

pub use classifier::KeywordClassifier;
pub use consensus::{aggregate, ConsensusDecision};
pub use escalation::{accepts, EscalationPlan};
pub use lifecycle::{RestartPolicy, WorkerLifecycle};
pub use lookup::{Fact, KeywordFactIndex};
pub use policy::{ConfidenceBandPolicy, NoSecondOpinion};
pub use weights::WeightTable;
