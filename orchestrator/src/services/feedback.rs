//! Feedback observations and published weights
//!
//! Observations are appended to `feedback:observations`; recomputing rebuilds
//! the whole table from that log and writes every `weights:*` key, so running
//! it twice gives the same result.

use shared::{keys, process_info, process_warn, CoordinationStore, FeedbackObservation, ProcessId};

use crate::core::WeightTable;
use crate::error::OrchestratorResult;

pub async fn record_observation<S>(store: &S, observation: &FeedbackObservation) -> OrchestratorResult<()>
where
    S: CoordinationStore + ?Sized,
{
    let encoded = serde_json::to_string(observation)?;
    store.append_to_log(keys::FEEDBACK_OBSERVATIONS, &encoded).await?;
    Ok(())
}

pub async fn load_observations<S>(store: &S) -> OrchestratorResult<Vec<FeedbackObservation>>
where
    S: CoordinationStore + ?Sized,
{
    let raw = store.read_log(keys::FEEDBACK_OBSERVATIONS).await?;
    let mut observations = Vec::with_capacity(raw.len());
    for entry in raw {
        match serde_json::from_str(&entry) {
            Ok(observation) => observations.push(observation),
            Err(e) => process_warn!(ProcessId::current(), "⚠️ Skipping bad feedback entry: {}", e),
        }
    }
    Ok(observations)
}

pub fn recompute_weights(observations: &[FeedbackObservation]) -> WeightTable {
    WeightTable::from_observations(observations)
}

pub async fn publish_weights<S>(store: &S, table: &WeightTable) -> OrchestratorResult<()>
where
    S: CoordinationStore + ?Sized,
{
    for (engine, weight) in table.global_entries() {
        store.set_value(&keys::weight(engine), &weight.to_string()).await?;
    }
    for (category, engine, weight) in table.category_entries() {
        store.set_value(&keys::category_weight(category, engine), &weight.to_string()).await?;
    }
    Ok(())
}

/// Rebuild weights from the observation log and publish them
pub async fn refresh_weights<S>(store: &S) -> OrchestratorResult<WeightTable>
where
    S: CoordinationStore + ?Sized,
{
    let observations = load_observations(store).await?;
    let table = recompute_weights(&observations);
    publish_weights(store, &table).await?;
    process_info!(
        ProcessId::current(),
        "⚖️ Published weights from {} feedback observations",
        observations.len()
    );
    Ok(table)
}

/// Read the weights needed to aggregate results from `engines`
///
/// Missing or unparsable entries are left out, so those engines weigh 1.0.
pub async fn load_weights<S>(store: &S, engines: &[String], category: Option<&str>) -> OrchestratorResult<WeightTable>
where
    S: CoordinationStore + ?Sized,
{
    let mut table = WeightTable::new();
    for engine in engines {
        if let Some(weight) = read_weight(store, &keys::weight(engine)).await? {
            table.set(engine, weight);
        }
        if let Some(category) = category {
            if let Some(weight) = read_weight(store, &keys::category_weight(category, engine)).await? {
                table.set_for_category(category, engine, weight);
            }
        }
    }
    Ok(table)
}

async fn read_weight<S>(store: &S, key: &str) -> OrchestratorResult<Option<f64>>
where
    S: CoordinationStore + ?Sized,
{
    Ok(store
        .get_value(key)
        .await?
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|weight| weight.is_finite() && *weight >= 0.0))
}
