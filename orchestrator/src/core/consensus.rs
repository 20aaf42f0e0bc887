//! Combines several tier results into one decision

use shared::{ConsensusStrategy, TierResult};

use super::weights::WeightTable;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Outcome of aggregating one or more tier results
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusDecision {
    pub answer: String,
    pub confidence: f64,
    pub strategy: ConsensusStrategy,
    /// Engines whose results were combined, in input order
    pub engines: Vec<String>,
    /// Engine whose answer text was selected
    pub chosen_engine: String,
    pub provenance: Vec<String>,
}

/// Combine `results` under `strategy`
///
/// Weighted strategies use `weights`, with `category` selecting category weights
/// for `WeightedByCategory`. When every weight is zero the plain mean is used.
pub fn aggregate(
    results: &[TierResult],
    strategy: ConsensusStrategy,
    category: Option<&str>,
    weights: &WeightTable,
) -> OrchestratorResult<ConsensusDecision> {
    if results.is_empty() {
        return Err(OrchestratorError::NoResults);
    }

    let (chosen, confidence) = match strategy {
        ConsensusStrategy::PassThrough => {
            let chosen = most_confident(results);
            (chosen, results[chosen].confidence)
        }
        ConsensusStrategy::SimpleAverage => (longest_answer(results), mean(results)),
        ConsensusStrategy::WeightedAverage => {
            (longest_answer(results), weighted_mean(results, |engine| weights.weight(engine)))
        }
        ConsensusStrategy::WeightedByCategory => (
            longest_answer(results),
            weighted_mean(results, |engine| weights.weight_for(engine, category)),
        ),
    };

    let mut provenance: Vec<String> = Vec::new();
    for entry in results.iter().flat_map(|result| result.provenance.iter()) {
        if !provenance.contains(entry) {
            provenance.push(entry.clone());
        }
    }

    Ok(ConsensusDecision {
        answer: results[chosen].answer.clone(),
        confidence,
        strategy,
        engines: results.iter().map(|result| result.engine.clone()).collect(),
        chosen_engine: results[chosen].engine.clone(),
        provenance,
    })
}

/// Index of the highest confidence, earliest on ties
fn most_confident(results: &[TierResult]) -> usize {
    let mut best = 0;
    for (index, result) in results.iter().enumerate().skip(1) {
        if result.confidence > results[best].confidence {
            best = index;
        }
    }
    best
}

/// Index of the longest answer text, earliest on ties
fn longest_answer(results: &[TierResult]) -> usize {
    let mut best = 0;
    let mut best_len = results[0].answer.chars().count();
    for (index, result) in results.iter().enumerate().skip(1) {
        let len = result.answer.chars().count();
        if len > best_len {
            best = index;
            best_len = len;
        }
    }
    best
}

fn mean(results: &[TierResult]) -> f64 {
    results.iter().map(|result| result.confidence).sum::<f64>() / results.len() as f64
}

fn weighted_mean<F>(results: &[TierResult], weight_of: F) -> f64
where
    F: Fn(&str) -> f64,
{
    let (weighted, total) = results.iter().fold((0.0, 0.0), |(weighted, total), result| {
        let weight = weight_of(&result.engine);
        (weighted + result.confidence * weight, total + weight)
    });

    if total > 0.0 {
        weighted / total
    } else {
        mean(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(engine: &str, answer: &str, confidence: f64) -> TierResult {
        let mut result = TierResult::new(engine, answer, confidence, 50);
        result.provenance = vec![format!("{engine}-source")];
        result
    }

    fn three_engines() -> Vec<TierResult> {
        vec![
            result("alpha", "Paris", 0.72),
            result("beta", "Paris, France", 0.78),
            result("gamma", "It is Paris", 0.91),
        ]
    }

    fn three_weights() -> WeightTable {
        let mut weights = WeightTable::new();
        weights.set("alpha", 0.8);
        weights.set("beta", 0.9);
        weights.set("gamma", 0.95);
        weights
    }

    #[test]
    fn test_empty_input_is_an_error() {
        let outcome = aggregate(&[], ConsensusStrategy::SimpleAverage, None, &WeightTable::new());
        assert!(matches!(outcome, Err(OrchestratorError::NoResults)));
    }

    #[test]
    fn test_pass_through_single_result() {
        let results = vec![result("fast", "42", 0.66)];
        let decision = aggregate(&results, ConsensusStrategy::PassThrough, None, &WeightTable::new()).unwrap();
        assert_eq!(decision.answer, "42");
        assert_eq!(decision.confidence, 0.66);
        assert_eq!(decision.chosen_engine, "fast");
    }

    #[test]
    fn test_pass_through_many_keeps_most_confident() {
        let decision = aggregate(&three_engines(), ConsensusStrategy::PassThrough, None, &WeightTable::new()).unwrap();
        assert_eq!(decision.chosen_engine, "gamma");
        assert_eq!(decision.confidence, 0.91);
        assert_eq!(decision.engines, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_simple_average() {
        let decision = aggregate(&three_engines(), ConsensusStrategy::SimpleAverage, None, &WeightTable::new()).unwrap();
        assert!((decision.confidence - 0.803_333).abs() < 1e-5);
        assert_eq!(decision.answer, "Paris, France");
        assert_eq!(decision.provenance.len(), 3);
    }

    #[test]
    fn test_weighted_average() {
        let decision =
            aggregate(&three_engines(), ConsensusStrategy::WeightedAverage, None, &three_weights()).unwrap();
        let expected = (0.72 * 0.8 + 0.78 * 0.9 + 0.91 * 0.95) / (0.8 + 0.9 + 0.95);
        assert!((decision.confidence - expected).abs() < 1e-9);
        assert!((decision.confidence - 0.8085).abs() < 1e-4);
    }

    #[test]
    fn test_weighted_without_table_equals_simple_average() {
        let weighted =
            aggregate(&three_engines(), ConsensusStrategy::WeightedAverage, None, &WeightTable::new()).unwrap();
        let simple = aggregate(&three_engines(), ConsensusStrategy::SimpleAverage, None, &WeightTable::new()).unwrap();
        assert!((weighted.confidence - simple.confidence).abs() < 1e-12);
    }

    #[test]
    fn test_all_zero_weights_fall_back_to_mean() {
        let mut weights = WeightTable::new();
        for engine in ["alpha", "beta", "gamma"] {
            weights.set(engine, 0.0);
        }
        let decision = aggregate(&three_engines(), ConsensusStrategy::WeightedAverage, None, &weights).unwrap();
        assert!((decision.confidence - 0.803_333).abs() < 1e-5);
    }

    #[test]
    fn test_weighted_by_category_prefers_category_weights() {
        let mut weights = three_weights();
        weights.set_for_category("geography", "alpha", 0.0);
        weights.set_for_category("geography", "beta", 0.0);

        let decision = aggregate(
            &three_engines(),
            ConsensusStrategy::WeightedByCategory,
            Some("geography"),
            &weights,
        )
        .unwrap();
        assert!((decision.confidence - 0.91).abs() < 1e-9);

        // Without a category it behaves like WeightedAverage
        let uncategorized =
            aggregate(&three_engines(), ConsensusStrategy::WeightedByCategory, None, &weights).unwrap();
        assert!((uncategorized.confidence - 0.8085).abs() < 1e-4);
    }

    #[test]
    fn test_answer_ties_go_to_first() {
        let results = vec![result("a", "same", 0.5), result("b", "also", 0.9)];
        let decision = aggregate(&results, ConsensusStrategy::SimpleAverage, None, &WeightTable::new()).unwrap();
        assert_eq!(decision.chosen_engine, "a");
    }
}
