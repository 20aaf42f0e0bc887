//! Tests for the diagnostic event feed

use serde_json::json;
use shared::{keys, CoordinationStore, EventLevel};

use super::common::store;
use crate::services::event_feed::{details, EventFeed};

#[tokio::test]
async fn test_timeline_preserves_order_and_details() {
    let store = store();
    let feed = EventFeed::new(store.clone(), EventLevel::Debug);

    feed.log_event("q1", "received", EventLevel::Info, details(json!({ "query": "hi" }))).await;
    feed.log_event("q1", "escalated", EventLevel::Info, details(json!({ "tier": 1 }))).await;
    feed.log_event("q2", "received", EventLevel::Info, details(json!(null))).await;

    let timeline = feed.query_timeline("q1").await.unwrap();
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[0].event, "received");
    assert_eq!(timeline[1].event, "escalated");
    assert_eq!(timeline[1].details["tier"], json!(1));
    assert!(timeline[0].timestamp <= timeline[1].timestamp);
}

#[tokio::test]
async fn test_events_below_level_are_not_persisted() {
    let store = store();
    let feed = EventFeed::new(store.clone(), EventLevel::Warn);

    feed.log_event("q1", "noise", EventLevel::Debug, details(json!({}))).await;
    feed.log_event("q1", "chatter", EventLevel::Info, details(json!({}))).await;
    feed.log_event("q1", "worker_dead", EventLevel::Warn, details(json!({}))).await;

    let timeline = feed.query_timeline("q1").await.unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].level, EventLevel::Warn);
}

#[tokio::test]
async fn test_undecodable_entries_are_skipped() {
    let store = store();
    let feed = EventFeed::new(store.clone(), EventLevel::Info);
    feed.log_event("q1", "received", EventLevel::Info, details(json!({}))).await;
    store.append_to_log(&keys::diagnostics("q1"), "{not json").await.unwrap();

    assert_eq!(feed.query_timeline("q1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_store_outage_never_fails_logging() {
    let store = store();
    let feed = EventFeed::new(store.clone(), EventLevel::Info);
    store.set_available(false);

    feed.log_event("q1", "received", EventLevel::Info, details(json!({}))).await;
    feed.increment_metric("queries_total").await;
    feed.record_latency("fast", 12).await;
    assert!(feed.query_timeline("q1").await.is_err());

    store.set_available(true);
    assert!(feed.query_timeline("q1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_metrics_and_latency_samples() {
    let store = store();
    let feed = EventFeed::new(store.clone(), EventLevel::Info);

    feed.increment_metric("queries_total").await;
    feed.increment_metric("queries_total").await;
    feed.record_latency("fast", 40).await;
    feed.record_latency("fast", 55).await;

    assert_eq!(feed.metric("queries_total").await.unwrap(), 2);
    assert_eq!(feed.metric("never_touched").await.unwrap(), 0);
    assert_eq!(store.read_log(&keys::latency_samples("fast")).await.unwrap(), vec!["40", "55"]);
}

#[test]
fn test_details_wraps_scalars() {
    assert_eq!(details(json!(3))["value"], json!(3));
    assert!(details(json!(null)).is_empty());
}
