//! Keyword-based query categories

use std::collections::{BTreeMap, BTreeSet};

use super::lookup::keywords;
use crate::traits::QueryClassifier;

/// Picks the category sharing the most keywords with the query
///
/// Categories are checked in name order, so ties go to the alphabetically
/// first. A query matching nothing is uncategorized.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier {
    categories: BTreeMap<String, BTreeSet<String>>,
}

impl KeywordClassifier {
    pub fn new(categories: &BTreeMap<String, Vec<String>>) -> Self {
        Self {
            categories: categories
                .iter()
                .map(|(name, words)| (name.clone(), words.iter().map(|w| w.to_lowercase()).collect()))
                .collect(),
        }
    }
}

impl QueryClassifier for KeywordClassifier {
    fn classify(&self, query: &str) -> Option<String> {
        let words = keywords(query);
        let mut best: Option<(&String, usize)> = None;
        for (name, vocabulary) in &self.categories {
            let hits = words.intersection(vocabulary).count();
            if hits > 0 && best.map_or(true, |(_, top)| hits > top) {
                best = Some((name, hits));
            }
        }
        best.map(|(name, _)| name.clone())
    }
}
