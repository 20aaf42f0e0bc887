//! Test fixtures and data for orchestrator tests

use orchestrator::core::Fact;
use orchestrator::{EscalationSettings, ExecutionMode, TierConfig};
use shared::{ConsensusStrategy, EventLevel};
use std::time::Duration;

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    /// Engine names
    pub const FAST: &'static str = "fast";
    pub const MEDIUM: &'static str = "medium";
    pub const GENERATIVE: &'static str = "generative";

    pub const QUERY: &'static str = "what is the speed of light in vacuum";

    /// Tier timeouts, short enough to keep timeout tests quick
    pub const FAST_TIMEOUT_MS: u64 = 300;
    pub const MEDIUM_TIMEOUT_MS: u64 = 400;
    pub const GENERATIVE_TIMEOUT_MS: u64 = 800;

    /// Local lookup, fast tier (remote tier 1), generative tier (remote tier 2)
    pub fn two_tier_settings() -> EscalationSettings {
        EscalationSettings {
            local_threshold: 0.85,
            tiers: vec![
                TierConfig::new(Self::FAST, Self::FAST, Self::FAST_TIMEOUT_MS, 0.75),
                TierConfig::new(Self::GENERATIVE, Self::GENERATIVE, Self::GENERATIVE_TIMEOUT_MS, 0.0),
            ],
            consensus: ConsensusStrategy::PassThrough,
            mode: ExecutionMode::Serial,
            retention: Duration::from_secs(3600),
            diagnostic_level: EventLevel::Debug,
        }
    }

    /// Adds a medium tier between fast and generative
    pub fn three_tier_settings() -> EscalationSettings {
        let mut settings = Self::two_tier_settings();
        settings.tiers.insert(
            1,
            TierConfig::new(Self::MEDIUM, Self::MEDIUM, Self::MEDIUM_TIMEOUT_MS, 0.75),
        );
        settings
    }

    pub fn facts() -> Vec<Fact> {
        vec![
            Fact {
                id: "physics:c".to_string(),
                content: "The speed of light in vacuum is 299,792,458 metres per second".to_string(),
                keywords: Vec::new(),
                confidence: 1.0,
            },
            Fact {
                id: "geo:everest".to_string(),
                content: "Mount Everest is the highest mountain above sea level".to_string(),
                keywords: Vec::new(),
                confidence: 0.95,
            },
        ]
    }
}
