//! Per-engine voting weights
//!
//! Weights are each engine's historical accuracy: correct observations over
//! total observations, kept globally and per query category. An engine with no
//! observations votes with weight 1.0.

use shared::FeedbackObservation;
use std::collections::HashMap;

pub const DEFAULT_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightTable {
    global: HashMap<String, f64>,
    by_category: HashMap<(String, String), f64>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    correct: u64,
    total: u64,
}

impl Tally {
    fn record(&mut self, correct: bool) {
        self.total += 1;
        if correct {
            self.correct += 1;
        }
    }

    fn accuracy(&self) -> f64 {
        self.correct as f64 / self.total as f64
    }
}

impl WeightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild weights from the full observation history
    pub fn from_observations(observations: &[FeedbackObservation]) -> Self {
        let mut global: HashMap<String, Tally> = HashMap::new();
        let mut by_category: HashMap<(String, String), Tally> = HashMap::new();

        for observation in observations {
            global.entry(observation.engine.clone()).or_default().record(observation.correct);
            if let Some(category) = &observation.category {
                by_category
                    .entry((category.clone(), observation.engine.clone()))
                    .or_default()
                    .record(observation.correct);
            }
        }

        Self {
            global: global.into_iter().map(|(engine, tally)| (engine, tally.accuracy())).collect(),
            by_category: by_category
                .into_iter()
                .map(|(key, tally)| (key, tally.accuracy()))
                .collect(),
        }
    }

    pub fn set(&mut self, engine: &str, weight: f64) {
        self.global.insert(engine.to_string(), weight);
    }

    pub fn set_for_category(&mut self, category: &str, engine: &str, weight: f64) {
        self.by_category.insert((category.to_string(), engine.to_string()), weight);
    }

    /// Global weight of an engine
    pub fn weight(&self, engine: &str) -> f64 {
        self.global.get(engine).copied().unwrap_or(DEFAULT_WEIGHT)
    }

    /// Category weight when one is known, otherwise the global weight
    pub fn weight_for(&self, engine: &str, category: Option<&str>) -> f64 {
        category
            .and_then(|category| self.by_category.get(&(category.to_string(), engine.to_string())))
            .copied()
            .unwrap_or_else(|| self.weight(engine))
    }

    pub fn global_entries(&self) -> impl Iterator<Item = (&str, f64)> {
        self.global.iter().map(|(engine, weight)| (engine.as_str(), *weight))
    }

    /// `(category, engine, weight)` triples
    pub fn category_entries(&self) -> impl Iterator<Item = (&str, &str, f64)> {
        self.by_category
            .iter()
            .map(|((category, engine), weight)| (category.as_str(), engine.as_str(), *weight))
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.by_category.is_empty()
    }
}
