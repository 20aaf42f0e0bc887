//! End-to-end escalation tests
//!
//! Real workers run as tasks against a shared in-memory coordination store;
//! the orchestrator under test only ever talks to the store.

use chrono::Utc;
use orchestrator::services::feedback;
use orchestrator::traits::MockProcessManager;
use orchestrator::{ExecutionMode, KeywordFactIndex, OrchestratorConfig, QueryOrchestrator, WeightTable, WorkerRegistry};
use shared::{get_json, keys, ConsensusStrategy, CoordinationStore, MemoryStore, QueryState, Resolution, ResolutionMethod};
use std::time::{Duration, Instant};

mod common;
use common::{OrchestratorBuilder, TestFixtures, TestHelpers};

const FAST: &str = TestFixtures::FAST;
const MEDIUM: &str = TestFixtures::MEDIUM;
const GENERATIVE: &str = TestFixtures::GENERATIVE;

fn tier(tier: usize, engine: &str) -> ResolutionMethod {
    ResolutionMethod::Tier { tier, engine: engine.to_string() }
}

async fn store_value(store: &MemoryStore, key: &str) -> Option<String> {
    store.get_value(key).await.unwrap()
}

/// Test that a confident local answer never reaches the workers
#[tokio::test]
async fn test_local_hit_finalizes_without_escalation() {
    // Arrange
    let store = TestHelpers::store();
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_local_hit("299,792,458 m/s", 0.92)
        .build();

    // Act
    let resolution = orchestrator.resolve(TestFixtures::QUERY).await;

    // Assert
    assert_eq!(resolution.method, ResolutionMethod::LocalLookup);
    assert_eq!(resolution.answer, "299,792,458 m/s");
    assert_eq!(resolution.tiers_attempted, vec![0]);
    assert_eq!(resolution.provenance, vec!["fact:1".to_string()]);
    assert!(TestHelpers::request(&store, &resolution.query_id, 1).await.is_none());

    let job = TestHelpers::job(&store, &resolution.query_id).await;
    assert_eq!(job.state, QueryState::Complete);
    let stored: Resolution = get_json(&*store, &keys::final_result(&resolution.query_id)).await.unwrap().unwrap();
    assert_eq!(stored, resolution);
}

/// Test the built-in keyword index as the local tier
#[tokio::test]
async fn test_keyword_index_answers_known_fact() {
    let store = TestHelpers::store();
    let orchestrator = QueryOrchestrator::new(
        store.clone(),
        KeywordFactIndex::from_facts(TestFixtures::facts()).unwrap(),
        TestFixtures::two_tier_settings(),
    );

    let resolution = orchestrator.resolve(TestFixtures::QUERY).await;

    assert_eq!(resolution.method, ResolutionMethod::LocalLookup);
    assert_eq!(resolution.confidence, 1.0);
    assert_eq!(resolution.provenance, vec!["physics:c".to_string()]);
}

/// Test that an accepted tier stops escalation
#[tokio::test]
async fn test_fast_tier_accepts_and_generative_never_asked() {
    // Arrange
    let store = TestHelpers::store();
    let fast = TestHelpers::answering(&store, 1, FAST, 0.9);
    let generative = TestHelpers::answering(&store, 2, GENERATIVE, 0.99);
    let orchestrator = OrchestratorBuilder::new(store.clone()).with_local_hit("maybe", 0.5).build();

    // Act
    let resolution = orchestrator.resolve(TestFixtures::QUERY).await;

    // Assert
    assert_eq!(resolution.method, tier(1, FAST));
    assert_eq!(resolution.confidence, 0.9);
    assert_eq!(resolution.tiers_attempted, vec![1]);
    assert!(TestHelpers::request(&store, &resolution.query_id, 1).await.is_some());
    assert!(TestHelpers::request(&store, &resolution.query_id, 2).await.is_none());
    assert!(TestHelpers::pending(&store, &resolution.query_id).await.is_empty());
    assert_eq!(orchestrator.feed().metric("tier:1:hits").await.unwrap(), 1);

    fast.stop().await;
    generative.stop().await;
}

/// Test escalation past a low-confidence tier
#[tokio::test]
async fn test_low_confidence_escalates_to_generative() {
    let store = TestHelpers::store();
    let fast = TestHelpers::answering(&store, 1, FAST, 0.5);
    let generative = TestHelpers::answering(&store, 2, GENERATIVE, 0.6);
    let orchestrator = OrchestratorBuilder::new(store.clone()).build();

    let resolution = orchestrator.resolve(TestFixtures::QUERY).await;

    assert_eq!(resolution.method, tier(2, GENERATIVE));
    assert_eq!(resolution.confidence, 0.6);
    assert_eq!(resolution.tiers_attempted, vec![1, 2]);
    assert!(resolution.answer.contains(TestFixtures::QUERY));

    let events = TestHelpers::events(&orchestrator, &resolution.query_id).await;
    assert_eq!(events.first().map(String::as_str), Some("received"));
    assert_eq!(events.last().map(String::as_str), Some("finalized"));
    assert!(events.iter().any(|e| e == "low_confidence"));
    assert_eq!(events.iter().filter(|e| *e == "escalated").count(), 2);

    fast.stop().await;
    generative.stop().await;
}

/// Test the soft failure after every tier timed out
#[tokio::test]
async fn test_no_workers_exhausts_every_tier_once() {
    // Arrange
    let store = TestHelpers::store();
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_tier_timeout(1, 100)
        .with_tier_timeout(2, 150)
        .build();

    // Act
    let resolution = orchestrator.resolve(TestFixtures::QUERY).await;

    // Assert
    assert_eq!(resolution.method, ResolutionMethod::Exhausted);
    assert_eq!(resolution.confidence, 0.0);
    assert_eq!(resolution.answer, Resolution::FALLBACK_ANSWER);
    assert!(!resolution.answer.is_empty());
    assert_eq!(resolution.tiers_attempted, vec![1, 2]);

    let id = resolution.query_id;
    assert!(TestHelpers::request(&store, &id, 1).await.is_some());
    assert!(TestHelpers::request(&store, &id, 2).await.is_some());
    assert!(TestHelpers::pending(&store, &id).await.is_empty());
    assert!(TestHelpers::queue(&store, FAST).await.is_empty());
    assert!(TestHelpers::queue(&store, GENERATIVE).await.is_empty());
    assert_eq!(TestHelpers::job(&store, &id).await.state, QueryState::FailedSoft);

    assert_eq!(orchestrator.feed().metric("exhausted_total").await.unwrap(), 1);
    assert_eq!(orchestrator.feed().metric("tier:1:timeouts").await.unwrap(), 1);
    let events = TestHelpers::events(&orchestrator, &id).await;
    assert_eq!(events.iter().filter(|e| *e == "tier_timeout").count(), 2);
    assert!(events.iter().any(|e| e == "exhausted"));
}

/// Test that an unreachable store still produces a well-formed answer
#[tokio::test]
async fn test_store_outage_is_a_soft_failure() {
    let store = TestHelpers::store();
    store.set_available(false);
    let orchestrator = OrchestratorBuilder::new(store.clone()).build();

    let resolution = orchestrator.resolve(TestFixtures::QUERY).await;

    assert_eq!(resolution.method, ResolutionMethod::StoreUnavailable);
    assert_eq!(resolution.confidence, 0.0);
    assert_eq!(resolution.answer, Resolution::FALLBACK_ANSWER);
    assert!(resolution.tiers_attempted.is_empty());
}

/// Test that a failing engine's refusal escalates without a second opinion
#[tokio::test]
async fn test_refusal_escalates() {
    let store = TestHelpers::store();
    let fast = TestHelpers::spawn_worker(
        &store,
        1,
        FAST,
        TestHelpers::engine(FAST, 0.7, 0).with_failure_rate(1.0),
    );
    let generative = TestHelpers::answering(&store, 2, GENERATIVE, 0.4);
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_band_policy(0.0, 0.75, 1)
        .build();

    let resolution = orchestrator.resolve(TestFixtures::QUERY).await;

    assert_eq!(resolution.method, tier(2, GENERATIVE));
    let events = TestHelpers::events(&orchestrator, &resolution.query_id).await;
    assert!(events.iter().any(|e| e == "refused"));
    assert!(!events.iter().any(|e| e == "second_opinion"));

    fast.stop().await;
    generative.stop().await;
}

/// Test that a borderline answer plus a second opinion can be accepted by consensus
#[tokio::test]
async fn test_second_opinion_consensus_accepts() {
    // Arrange
    let store = TestHelpers::store();
    let fast = TestHelpers::answering(&store, 1, FAST, 0.72);
    let generative = TestHelpers::answering(&store, 2, GENERATIVE, 0.91);
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_band_policy(0.6, 0.75, 1)
        .with_consensus(ConsensusStrategy::SimpleAverage)
        .build();

    // Act
    let resolution = orchestrator.resolve(TestFixtures::QUERY).await;

    // Assert
    assert_eq!(
        resolution.method,
        ResolutionMethod::Consensus {
            strategy: ConsensusStrategy::SimpleAverage,
            engines: vec![FAST.to_string(), GENERATIVE.to_string()],
        }
    );
    assert!((resolution.confidence - 0.815).abs() < 1e-9);
    assert!(resolution.answer.starts_with("[generative]"));
    assert_eq!(resolution.tiers_attempted, vec![1, 2]);
    assert_eq!(orchestrator.feed().metric("consensus_accepted").await.unwrap(), 1);

    fast.stop().await;
    generative.stop().await;
}

/// Test weighted consensus reads published engine weights
#[tokio::test]
async fn test_weighted_consensus_uses_published_weights() {
    let store = TestHelpers::store();
    let mut weights = WeightTable::new();
    weights.set(FAST, 1.0);
    weights.set(GENERATIVE, 3.0);
    feedback::publish_weights(&*store, &weights).await.unwrap();

    let fast = TestHelpers::answering(&store, 1, FAST, 0.72);
    let generative = TestHelpers::answering(&store, 2, GENERATIVE, 0.91);
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_band_policy(0.6, 0.75, 1)
        .with_consensus(ConsensusStrategy::WeightedAverage)
        .build();

    let resolution = orchestrator.resolve(TestFixtures::QUERY).await;

    // (0.72 * 1 + 0.91 * 3) / 4
    assert!((resolution.confidence - 0.8625).abs() < 1e-9);

    fast.stop().await;
    generative.stop().await;
}

/// Test that a rejected consensus keeps escalating past every tier it consulted
#[tokio::test]
async fn test_rejected_consensus_continues_past_consulted_tiers() {
    let store = TestHelpers::store();
    let fast = TestHelpers::answering(&store, 1, FAST, 0.62);
    let medium = TestHelpers::answering(&store, 2, MEDIUM, 0.3);
    let generative = TestHelpers::answering(&store, 3, GENERATIVE, 0.5);
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_settings(TestFixtures::three_tier_settings())
        .with_band_policy(0.6, 0.75, 1)
        .with_consensus(ConsensusStrategy::SimpleAverage)
        .build();

    let resolution = orchestrator.resolve(TestFixtures::QUERY).await;

    assert_eq!(resolution.method, tier(3, GENERATIVE));
    assert_eq!(resolution.tiers_attempted, vec![1, 2, 3]);
    let events = TestHelpers::events(&orchestrator, &resolution.query_id).await;
    assert_eq!(events.iter().filter(|e| *e == "escalated").count(), 3);
    assert!(events.iter().any(|e| e == "consensus"));

    fast.stop().await;
    medium.stop().await;
    generative.stop().await;
}

/// Test parallel gathering of several extra opinions
#[tokio::test]
async fn test_parallel_second_opinions() {
    let store = TestHelpers::store();
    let fast = TestHelpers::answering(&store, 1, FAST, 0.7);
    let medium = TestHelpers::spawn_worker(&store, 2, MEDIUM, TestHelpers::engine(MEDIUM, 0.8, 100));
    let generative = TestHelpers::spawn_worker(&store, 3, GENERATIVE, TestHelpers::engine(GENERATIVE, 0.9, 100));
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_settings(TestFixtures::three_tier_settings())
        .with_band_policy(0.6, 0.75, 2)
        .with_consensus(ConsensusStrategy::SimpleAverage)
        .with_mode(ExecutionMode::Parallel)
        .build();

    let resolution = orchestrator.resolve(TestFixtures::QUERY).await;

    match &resolution.method {
        ResolutionMethod::Consensus { engines, .. } => assert_eq!(engines.len(), 3),
        other => panic!("expected consensus, got {other:?}"),
    }
    assert!((resolution.confidence - 0.8).abs() < 1e-9);
    assert_eq!(resolution.tiers_attempted, vec![1, 2, 3]);

    fast.stop().await;
    medium.stop().await;
    generative.stop().await;
}

/// Test that a health sweep unblocks a query waiting on a hung worker
#[tokio::test]
async fn test_dead_worker_escalates_within_one_sweep() {
    // Arrange: the fast worker is registered but stopped heartbeating long ago
    let store = TestHelpers::store();
    TestHelpers::register_hung_worker(&store, FAST, 1, chrono::Duration::seconds(30)).await;
    let generative = TestHelpers::answering(&store, 2, GENERATIVE, 0.8);

    let mut config = OrchestratorConfig::default();
    config.health.grace_ms = 3000;
    let registry = WorkerRegistry::new(store.clone(), MockProcessManager::new(), &config);
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_tier_timeout(1, 10_000)
        .build();

    // Act
    let started = Instant::now();
    let (resolution, report) = tokio::join!(orchestrator.resolve(TestFixtures::QUERY), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        registry.sweep(Utc::now()).await.unwrap()
    });

    // Assert
    assert_eq!(report.marked_dead, vec![FAST.to_string()]);
    assert_eq!(report.notified_queries, 1);
    assert_eq!(resolution.method, tier(2, GENERATIVE));
    assert!(started.elapsed() < Duration::from_secs(5));

    let events = TestHelpers::events(&orchestrator, &resolution.query_id).await;
    assert!(events.iter().any(|e| e == "worker_dead"));
    assert!(events.iter().any(|e| e == "worker_dead_escalation"));
    assert!(TestHelpers::queue(&store, FAST).await.is_empty());

    generative.stop().await;
}

/// Test that a deregistered engine is skipped without waiting out its budget
#[tokio::test]
async fn test_deregistered_worker_is_skipped_immediately() {
    let store = TestHelpers::store();
    let fast = TestHelpers::answering(&store, 1, FAST, 0.9);
    let generative = TestHelpers::answering(&store, 2, GENERATIVE, 0.6);
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_tier_timeout(1, 5000)
        .build();

    assert_eq!(orchestrator.resolve(TestFixtures::QUERY).await.method, tier(1, FAST));
    fast.stop().await;

    let started = Instant::now();
    let resolution = orchestrator.resolve(TestFixtures::QUERY).await;

    assert_eq!(resolution.method, tier(2, GENERATIVE));
    assert!(started.elapsed() < Duration::from_secs(3));

    generative.stop().await;
}

/// Test that a worker started late never answers requests the query escalated past
#[tokio::test]
async fn test_late_worker_never_serves_stale_requests() {
    // Arrange: no fast worker yet, so tier 1 times out
    let store = TestHelpers::store();
    let generative = TestHelpers::answering(&store, 2, GENERATIVE, 0.6);
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_tier_timeout(1, 100)
        .build();

    let escalated = orchestrator.resolve(TestFixtures::QUERY).await;
    assert_eq!(escalated.method, tier(2, GENERATIVE));

    // Act: the fast worker comes up afterwards
    let fast = TestHelpers::answering(&store, 1, FAST, 0.9);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Assert: the old request is never answered, new work is
    let stale = store_value(&store, &keys::tier_result(&escalated.query_id, 1)).await;
    assert_eq!(stale, None);
    let fresh = orchestrator.resolve(TestFixtures::QUERY).await;
    assert_eq!(fresh.method, tier(1, FAST));

    fast.stop().await;
    generative.stop().await;
}

/// Test that concurrent queries are independent
#[tokio::test]
async fn test_resolve_all_keeps_queries_apart() {
    let store = TestHelpers::store();
    let fast = TestHelpers::answering(&store, 1, FAST, 0.9);
    let orchestrator = OrchestratorBuilder::new(store.clone()).build();
    let queries: Vec<String> = (0..5).map(|i| format!("question number {i}")).collect();

    let resolutions = orchestrator.resolve_all(&queries).await;

    assert_eq!(resolutions.len(), 5);
    for (query, resolution) in queries.iter().zip(&resolutions) {
        assert_eq!(resolution.method, tier(1, FAST));
        assert!(resolution.answer.contains(query.as_str()));
    }
    let mut ids: Vec<String> = resolutions.iter().map(|r| r.query_id.to_string()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);
    assert_eq!(orchestrator.feed().metric("queries_total").await.unwrap(), 5);

    fast.stop().await;
}

/// Test that terminal queries expire from the store
#[tokio::test]
async fn test_terminal_query_keys_expire() {
    let store = TestHelpers::store();
    let fast = TestHelpers::answering(&store, 1, FAST, 0.9);
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_retention(Duration::from_millis(50))
        .build();

    let resolution = orchestrator.resolve(TestFixtures::QUERY).await;
    let id = resolution.query_id;
    assert!(store_value(&store, &keys::final_result(&id)).await.is_some());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(store_value(&store, &keys::final_result(&id)).await, None);
    assert_eq!(store_value(&store, &keys::query_state(&id)).await, None);
    assert_eq!(store_value(&store, &keys::tier_result(&id, 1)).await, None);
    assert!(TestHelpers::events(&orchestrator, &id).await.is_empty());

    fast.stop().await;
}
