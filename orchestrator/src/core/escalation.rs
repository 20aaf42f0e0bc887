//! Tier ordering and acceptance rules for a single query

use std::collections::VecDeque;

/// Whether an answer with `confidence` is good enough at a tier with `threshold`
///
/// Zero confidence is a refusal and is never accepted, even at threshold 0.
pub fn accepts(confidence: f64, threshold: f64) -> bool {
    confidence > 0.0 && confidence >= threshold
}

/// Remote tiers a query still may try, cheapest first
///
/// Every tier leaves `remaining` exactly once, which is what guarantees one
/// request per (query, tier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationPlan {
    remaining: VecDeque<usize>,
    attempted: Vec<usize>,
}

impl EscalationPlan {
    /// Plan over remote tiers `1..=tier_count`
    pub fn new(tier_count: usize) -> Self {
        Self {
            remaining: (1..=tier_count).collect(),
            attempted: Vec::new(),
        }
    }

    /// Take the next tier to try
    pub fn next_tier(&mut self) -> Option<usize> {
        let tier = self.remaining.pop_front()?;
        self.attempted.push(tier);
        Some(tier)
    }

    /// Take specific tiers out of the plan (second opinions); tiers already used are skipped
    pub fn take(&mut self, tiers: &[usize]) -> Vec<usize> {
        let mut taken = Vec::new();
        for tier in tiers {
            if let Some(position) = self.remaining.iter().position(|t| t == tier) {
                self.remaining.remove(position);
                self.attempted.push(*tier);
                taken.push(*tier);
            }
        }
        taken
    }

    pub fn remaining(&self) -> Vec<usize> {
        self.remaining.iter().copied().collect()
    }

    pub fn attempted(&self) -> &[usize] {
        &self.attempted
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining.is_empty()
    }
}
