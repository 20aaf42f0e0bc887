//! Keyword fact index used as the tier-0 lookup

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::{LocalLookup, LookupHit};

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "what", "which", "who", "whom", "how", "why", "when", "where",
    "does", "did", "is", "of", "a", "an", "in", "on", "to", "it", "its", "this", "that", "with", "from",
    "can", "you", "tell", "about", "me", "be", "do",
];

/// Lowercased content words of `text`, stopwords and single characters removed
pub fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() > 1)
        .map(str::to_lowercase)
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
        .collect()
}

/// One fact as stored in a fact file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub content: String,
    /// Derived from the content when empty
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_fact_confidence")]
    pub confidence: f64,
}

fn default_fact_confidence() -> f64 {
    1.0
}

#[derive(Debug, Clone)]
struct IndexedFact {
    fact: Fact,
    keywords: BTreeSet<String>,
}

/// Scores facts by the fraction of query keywords they contain
///
/// Confidence of a hit is `matched / query_keywords * fact.confidence`; the
/// best-scoring fact wins, the earliest one on ties.
#[derive(Debug, Clone, Default)]
pub struct KeywordFactIndex {
    facts: Vec<IndexedFact>,
}

impl KeywordFactIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_facts(facts: impl IntoIterator<Item = Fact>) -> OrchestratorResult<Self> {
        let mut index = Self::new();
        for fact in facts {
            index.insert(fact)?;
        }
        Ok(index)
    }

    /// Load a JSON array of facts
    pub fn from_json_file(path: &Path) -> OrchestratorResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::config(format!("cannot read fact file {}: {e}", path.display()))
        })?;
        let facts: Vec<Fact> = serde_json::from_str(&raw)?;
        Self::from_facts(facts)
    }

    /// Facts must carry a confidence within [0, 1]
    pub fn insert(&mut self, fact: Fact) -> OrchestratorResult<()> {
        if !(0.0..=1.0).contains(&fact.confidence) {
            return Err(OrchestratorError::config(format!(
                "fact {} has confidence {} outside [0, 1]",
                fact.id, fact.confidence
            )));
        }
        let keywords = if fact.keywords.is_empty() {
            keywords(&fact.content)
        } else {
            fact.keywords.iter().map(|k| k.to_lowercase()).collect()
        };
        self.facts.push(IndexedFact { fact, keywords });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    fn best_match(&self, query: &str) -> Option<LookupHit> {
        let wanted = keywords(query);
        if wanted.is_empty() {
            return None;
        }

        let mut best: Option<(f64, &IndexedFact)> = None;
        for indexed in &self.facts {
            let matched = wanted.intersection(&indexed.keywords).count();
            if matched == 0 {
                continue;
            }
            let score = matched as f64 / wanted.len() as f64 * indexed.fact.confidence;
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, indexed));
            }
        }

        best.map(|(confidence, indexed)| LookupHit {
            answer: indexed.fact.content.clone(),
            confidence,
            fact_ids: vec![indexed.fact.id.clone()],
        })
    }
}

#[async_trait]
impl LocalLookup for KeywordFactIndex {
    async fn lookup(&self, query: &str) -> Option<LookupHit> {
        self.best_match(query)
    }
}
