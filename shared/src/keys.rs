//! Coordination store key schema
//!
//! Every component builds keys through these functions so the layout of the
//! store is defined in exactly one place.

use crate::types::QueryId;

/// Set of worker names that registered themselves
pub const REGISTERED_WORKERS: &str = "workers:registered";

/// Log of feedback observations used to recompute weights
pub const FEEDBACK_OBSERVATIONS: &str = "feedback:observations";

pub fn query_state(id: &QueryId) -> String {
    format!("query:{id}:state")
}

pub fn tier_request(id: &QueryId, tier: usize) -> String {
    format!("query:{id}:tier:{tier}:request")
}

pub fn tier_result(id: &QueryId, tier: usize) -> String {
    format!("query:{id}:tier:{tier}:result")
}

pub fn pending(id: &QueryId) -> String {
    format!("query:{id}:pending")
}

pub fn final_result(id: &QueryId) -> String {
    format!("query:{id}:final")
}

/// Engines the health monitor reported dead while this query waited on them
pub fn dead_engines(id: &QueryId) -> String {
    format!("query:{id}:dead")
}

pub fn diagnostics(id: &str) -> String {
    format!("diagnostics:{id}:events")
}

pub fn worker_alive(name: &str) -> String {
    format!("worker:{name}:alive")
}

pub fn worker_status(name: &str) -> String {
    format!("worker:{name}:status")
}

pub fn worker_heartbeat(name: &str) -> String {
    format!("worker:{name}:heartbeat")
}

pub fn worker_capabilities(name: &str) -> String {
    format!("worker:{name}:capabilities")
}

pub fn worker_load(name: &str) -> String {
    format!("worker:{name}:load")
}

/// Queries currently waiting on this worker
pub fn worker_assigned(name: &str) -> String {
    format!("worker:{name}:assigned")
}

/// Work items (`{query_id}:{tier}`) waiting to be claimed by an engine
pub fn work_queue(engine: &str) -> String {
    format!("work:{engine}:queue")
}

pub fn metric(name: &str) -> String {
    format!("metrics:{name}")
}

pub fn latency_samples(engine: &str) -> String {
    format!("metrics:latency:{engine}")
}

pub fn weight(engine: &str) -> String {
    format!("weights:{engine}")
}

pub fn category_weight(category: &str, engine: &str) -> String {
    format!("weights:{category}:{engine}")
}

/// All keys belonging to a query, used to apply the retention TTL
pub fn query_keys(id: &QueryId, tiers: impl IntoIterator<Item = usize>) -> Vec<String> {
    let mut keys = vec![
        query_state(id),
        pending(id),
        final_result(id),
        dead_engines(id),
        diagnostics(&id.to_string()),
    ];
    for tier in tiers {
        keys.push(tier_request(id, tier));
        keys.push(tier_result(id, tier));
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_key_layout() {
        let id: QueryId = "550e8400-e29b-41d4-a716-446655440001".parse().unwrap();
        assert_eq!(query_state(&id), "query:550e8400-e29b-41d4-a716-446655440001:state");
        assert_eq!(
            tier_result(&id, 2),
            "query:550e8400-e29b-41d4-a716-446655440001:tier:2:result"
        );
        assert_eq!(category_weight("physics", "fast"), "weights:physics:fast");
        assert_eq!(worker_heartbeat("fast"), "worker:fast:heartbeat");
    }

    #[test]
    fn test_query_keys_cover_tiers() {
        let id = QueryId::new();
        let keys = query_keys(&id, [1, 2]);
        assert_eq!(keys.len(), 9);
        assert!(keys.contains(&tier_request(&id, 2)));
    }
}
