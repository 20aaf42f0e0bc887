//! Work queue helpers (pure functions)

use shared::{process_warn, ProcessId, WorkItem};
use std::collections::BTreeSet;

use crate::error::{WorkerError, WorkerResult};

/// Parse a capability list such as `"1,2"`
pub fn parse_capabilities(raw: &str) -> WorkerResult<BTreeSet<usize>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<usize>()
                .ok()
                .filter(|&tier| tier > 0)
                .ok_or_else(|| WorkerError::config(format!("invalid capability '{part}'")))
        })
        .collect()
}

/// Queue entries this worker may claim, in a stable order
///
/// Malformed entries are skipped with a warning; entries for tiers the worker
/// does not serve are left for someone else.
pub fn claimable(members: impl IntoIterator<Item = String>, capabilities: &BTreeSet<usize>) -> Vec<WorkItem> {
    let mut items: Vec<WorkItem> = members
        .into_iter()
        .filter_map(|raw| match raw.parse::<WorkItem>() {
            Ok(item) => Some(item),
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ Skipping queue entry: {}", e);
                None
            }
        })
        .filter(|item| capabilities.contains(&item.tier))
        .collect();
    items.sort_by_key(|item| (item.tier, item.query_id.to_string()));
    items
}
