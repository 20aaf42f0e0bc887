//! Second-opinion policies

use crate::config::SecondOpinionConfig;
use crate::traits::{OpinionRequest, SecondOpinionPolicy};

/// Pure escalation: never ask for more opinions
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecondOpinion;

impl SecondOpinionPolicy for NoSecondOpinion {
    fn extra_tiers(&self, _request: &OpinionRequest<'_>) -> Vec<usize> {
        Vec::new()
    }
}

/// Ask the next tier(s) when a rejected answer lands in a borderline band
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceBandPolicy {
    low: f64,
    high: f64,
    extra_tiers: usize,
    categories: Vec<String>,
}

impl ConfidenceBandPolicy {
    /// Band is `[low, high)`
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high, extra_tiers: 1, categories: Vec::new() }
    }

    pub fn with_extra_tiers(mut self, extra_tiers: usize) -> Self {
        self.extra_tiers = extra_tiers;
        self
    }

    /// Only trigger for these categories
    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn from_config(config: &SecondOpinionConfig) -> Self {
        Self::new(config.low, config.high)
            .with_extra_tiers(config.extra_tiers)
            .with_categories(config.categories.clone())
    }

    fn category_allowed(&self, category: Option<&str>) -> bool {
        self.categories.is_empty() || category.is_some_and(|c| self.categories.iter().any(|allowed| allowed == c))
    }
}

impl SecondOpinionPolicy for ConfidenceBandPolicy {
    fn extra_tiers(&self, request: &OpinionRequest<'_>) -> Vec<usize> {
        let confidence = request.result.confidence;
        if request.result.is_refusal() || confidence < self.low || confidence >= self.high {
            return Vec::new();
        }
        if !self.category_allowed(request.category) {
            return Vec::new();
        }
        request.remaining.iter().copied().take(self.extra_tiers).collect()
    }
}

/// Policy described by configuration
pub fn from_config(config: &SecondOpinionConfig) -> Box<dyn SecondOpinionPolicy> {
    if config.enabled {
        Box::new(ConfidenceBandPolicy::from_config(config))
    } else {
        Box::new(NoSecondOpinion)
    }
}
