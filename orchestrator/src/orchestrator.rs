//! Query orchestrator
//!
//! Drives one query through the tiers: the local lookup first, then each
//! remote tier in ascending cost order until an answer is accepted. Every
//! tier is attempted at most once per query. Whatever happens, the caller
//! gets a well-formed `Resolution`; only an unreachable store cuts a query
//! short, and even then the answer is a soft failure rather than an error.

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::json;
use shared::{
    keys, logging, process_debug, process_warn, put_json, Awaited, ConsensusStrategy, CoordinationStore, EscalationReason,
    EventLevel, PollingAwaiter, ProcessId, QueryJob, QueryState, Resolution, ResolutionMethod, ResultAwaiter,
    ResultWatch, TierRequest, TierResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{ExecutionMode, OrchestratorConfig, TierConfig};
use crate::core::{accepts, aggregate, policy, EscalationPlan, KeywordClassifier, NoSecondOpinion};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::services::{details, feedback, EventFeed};
use crate::traits::{LocalLookup, OpinionRequest, QueryClassifier, SecondOpinionPolicy};

/// Escalation parameters taken from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationSettings {
    pub local_threshold: f64,
    /// Remote tiers; tier `k` is `tiers[k - 1]`
    pub tiers: Vec<TierConfig>,
    pub consensus: ConsensusStrategy,
    pub mode: ExecutionMode,
    /// How long terminal queries stay in the store
    pub retention: Duration,
    pub diagnostic_level: EventLevel,
}

impl EscalationSettings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            local_threshold: config.local_tier.threshold,
            tiers: config.tiers.clone(),
            consensus: config.consensus,
            mode: config.execution_mode,
            retention: config.retention(),
            diagnostic_level: config.diagnostics.level,
        }
    }

    pub fn tier(&self, tier: usize) -> OrchestratorResult<&TierConfig> {
        tier.checked_sub(1)
            .and_then(|position| self.tiers.get(position))
            .ok_or_else(|| OrchestratorError::config(format!("tier {tier} is not configured")))
    }
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

/// How a single tier attempt ended
#[derive(Debug, Clone, PartialEq)]
enum TierOutcome {
    Answered(TierResult),
    TimedOut,
    WorkerDead,
}

pub struct QueryOrchestrator<S, L>
where
    S: CoordinationStore + Clone + 'static,
    L: LocalLookup + 'static,
{
    store: S,
    lookup: L,
    feed: EventFeed<S>,
    awaiter: Arc<dyn ResultAwaiter>,
    classifier: Arc<dyn QueryClassifier>,
    policy: Arc<dyn SecondOpinionPolicy>,
    settings: EscalationSettings,
}

impl<S, L> QueryOrchestrator<S, L>
where
    S: CoordinationStore + Clone + 'static,
    L: LocalLookup + 'static,
{
    /// Pure escalation: polling waits, no classification, no second opinions
    pub fn new(store: S, lookup: L, settings: EscalationSettings) -> Self {
        Self {
            feed: EventFeed::new(store.clone(), settings.diagnostic_level),
            store,
            lookup,
            awaiter: Arc::new(PollingAwaiter::default()),
            classifier: Arc::new(KeywordClassifier::default()),
            policy: Arc::new(NoSecondOpinion),
            settings,
        }
    }

    /// Everything the configuration describes
    pub fn from_config(store: S, lookup: L, config: &OrchestratorConfig) -> Self {
        Self::new(store, lookup, EscalationSettings::from_config(config))
            .with_awaiter(PollingAwaiter::new(config.poll_interval()))
            .with_classifier(KeywordClassifier::new(&config.categories))
            .with_policy_boxed(policy::from_config(&config.second_opinion))
    }

    /// Configure how results are awaited (fluent API)
    pub fn with_awaiter(mut self, awaiter: impl ResultAwaiter + 'static) -> Self {
        self.awaiter = Arc::new(awaiter);
        self
    }

    /// Configure query classification (fluent API)
    pub fn with_classifier(mut self, classifier: impl QueryClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Configure the second-opinion policy (fluent API)
    pub fn with_policy(mut self, policy: impl SecondOpinionPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    fn with_policy_boxed(mut self, policy: Box<dyn SecondOpinionPolicy>) -> Self {
        self.policy = Arc::from(policy);
        self
    }

    pub fn settings(&self) -> &EscalationSettings {
        &self.settings
    }

    pub fn feed(&self) -> &EventFeed<S> {
        &self.feed
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve one query; never fails
    pub async fn resolve(&self, query: &str) -> Resolution {
        let mut job = QueryJob::new(query);
        let mut plan = EscalationPlan::new(self.settings.tiers.len());

        match self.drive(&mut job, &mut plan).await {
            Ok(resolution) => resolution,
            Err(e) => self.fail_soft(&mut job, &plan, e).await,
        }
    }

    /// Resolve several independent queries concurrently, answers in input order
    pub async fn resolve_all(&self, queries: &[String]) -> Vec<Resolution> {
        join_all(queries.iter().map(|query| self.resolve(query))).await
    }

    async fn drive(&self, job: &mut QueryJob, plan: &mut EscalationPlan) -> OrchestratorResult<Resolution> {
        let query_id = job.id.to_string();
        self.save_job(job).await?;
        self.feed.increment_metric("queries_total").await;
        self.feed
            .log_event(&query_id, "received", EventLevel::Info, details(json!({ "query": job.query })))
            .await;

        job.state = QueryState::Tier0Attempt;
        self.save_job(job).await?;
        if let Some(resolution) = self.try_local(job).await {
            return self.finalize(job, plan, resolution).await;
        }

        let category = self.classifier.classify(&job.query);
        if let Some(category) = &category {
            self.feed
                .log_event(&query_id, "classified", EventLevel::Debug, details(json!({ "category": category })))
                .await;
        }

        let mut from_tier = 0;
        let mut reason = EscalationReason::LowConfidence;
        while let Some(tier) = plan.next_tier() {
            let tier_config = self.settings.tier(tier)?.clone();
            job.current_tier = tier;
            job.state = QueryState::Escalating { from_tier, reason };
            self.save_job(job).await?;
            job.state = QueryState::Waiting { tier };
            self.save_job(job).await?;

            reason = match self.attempt_tier(job, tier, tier_config.timeout(), category.as_deref()).await? {
                TierOutcome::Answered(result) if accepts(result.confidence, tier_config.threshold) => {
                    self.feed.increment_metric(&format!("tier:{tier}:hits")).await;
                    job.state = QueryState::Accepted { tier };
                    let resolution = Resolution {
                        query_id: job.id,
                        answer: result.answer,
                        confidence: result.confidence,
                        method: ResolutionMethod::Tier { tier, engine: result.engine },
                        provenance: result.provenance,
                        tiers_attempted: plan.attempted().to_vec(),
                    };
                    return self.finalize(job, plan, resolution).await;
                }
                TierOutcome::Answered(result) if result.is_refusal() => {
                    self.feed
                        .log_event(
                            &query_id,
                            "refused",
                            EventLevel::Info,
                            details(json!({ "tier": tier, "engine": result.engine, "provenance": result.provenance })),
                        )
                        .await;
                    EscalationReason::Refused
                }
                TierOutcome::Answered(result) => {
                    self.feed
                        .log_event(
                            &query_id,
                            "low_confidence",
                            EventLevel::Info,
                            details(json!({
                                "tier": tier,
                                "engine": result.engine,
                                "confidence": result.confidence,
                                "threshold": tier_config.threshold,
                            })),
                        )
                        .await;
                    if let Some(resolution) = self
                        .seek_consensus(job, plan, &tier_config, tier, result, category.as_deref())
                        .await?
                    {
                        return self.finalize(job, plan, resolution).await;
                    }
                    EscalationReason::LowConfidence
                }
                TierOutcome::TimedOut => EscalationReason::TimedOut,
                TierOutcome::WorkerDead => EscalationReason::WorkerDead,
            };
            from_tier = tier;
        }

        self.feed.increment_metric("exhausted_total").await;
        self.feed
            .log_event(
                &query_id,
                "exhausted",
                EventLevel::Warn,
                details(json!({ "tiers_attempted": plan.attempted(), "last_reason": reason })),
            )
            .await;
        let resolution = Resolution::soft_failure(job.id, ResolutionMethod::Exhausted, plan.attempted().to_vec());
        self.finalize(job, plan, resolution).await
    }

    /// Tier 0; no store round trip is involved in the lookup itself
    async fn try_local(&self, job: &QueryJob) -> Option<Resolution> {
        let query_id = job.id.to_string();
        let Some(hit) = self.lookup.lookup(&job.query).await else {
            self.feed
                .log_event(&query_id, "tier0_miss", EventLevel::Debug, details(json!({})))
                .await;
            return None;
        };

        if !accepts(hit.confidence, self.settings.local_threshold) {
            self.feed
                .log_event(
                    &query_id,
                    "tier0_rejected",
                    EventLevel::Info,
                    details(json!({ "confidence": hit.confidence, "threshold": self.settings.local_threshold })),
                )
                .await;
            return None;
        }

        self.feed.increment_metric("tier:0:hits").await;
        Some(Resolution {
            query_id: job.id,
            answer: hit.answer,
            confidence: hit.confidence,
            method: ResolutionMethod::LocalLookup,
            provenance: hit.fact_ids,
            tiers_attempted: vec![0],
        })
    }

    /// Ask additional tiers when the policy wants them and vote
    async fn seek_consensus(
        &self,
        job: &mut QueryJob,
        plan: &mut EscalationPlan,
        tier_config: &TierConfig,
        tier: usize,
        first: TierResult,
        category: Option<&str>,
    ) -> OrchestratorResult<Option<Resolution>> {
        let remaining = plan.remaining();
        let wanted = self.policy.extra_tiers(&OpinionRequest {
            tier,
            result: &first,
            category,
            remaining: &remaining,
        });
        let extra = plan.take(&wanted);
        let Some(&first_extra) = extra.first() else {
            return Ok(None);
        };

        let query_id = job.id.to_string();
        self.feed
            .log_event(
                &query_id,
                "second_opinion",
                EventLevel::Info,
                details(json!({ "tier": tier, "extra_tiers": extra, "mode": format!("{:?}", self.settings.mode) })),
            )
            .await;
        job.state = QueryState::Waiting { tier: first_extra };
        self.save_job(job).await?;

        let mut results = vec![first];
        results.extend(self.gather(job, &extra, tier_config.timeout(), category).await?);

        let engines: Vec<String> = results.iter().map(|result| result.engine.clone()).collect();
        let weights = feedback::load_weights(&self.store, &engines, category).await?;
        let decision = aggregate(&results, self.settings.consensus, category, &weights)?;

        let accepted = accepts(decision.confidence, tier_config.threshold);
        self.feed
            .log_event(
                &query_id,
                "consensus",
                EventLevel::Info,
                details(json!({
                    "strategy": decision.strategy,
                    "engines": decision.engines,
                    "confidence": decision.confidence,
                    "accepted": accepted,
                })),
            )
            .await;
        if !accepted {
            return Ok(None);
        }

        self.feed.increment_metric("consensus_accepted").await;
        job.state = QueryState::Accepted { tier };
        Ok(Some(Resolution {
            query_id: job.id,
            answer: decision.answer,
            confidence: decision.confidence,
            method: ResolutionMethod::Consensus { strategy: decision.strategy, engines: decision.engines },
            provenance: decision.provenance,
            tiers_attempted: plan.attempted().to_vec(),
        }))
    }

    /// Collect usable answers from `tiers`, each capped at `cap`
    async fn gather(
        &self,
        job: &QueryJob,
        tiers: &[usize],
        cap: Duration,
        category: Option<&str>,
    ) -> OrchestratorResult<Vec<TierResult>> {
        let mut budgets = Vec::with_capacity(tiers.len());
        for &tier in tiers {
            budgets.push((tier, self.settings.tier(tier)?.timeout().min(cap)));
        }

        let outcomes = match self.settings.mode {
            ExecutionMode::Serial => {
                let mut outcomes = Vec::with_capacity(budgets.len());
                for (tier, budget) in budgets {
                    outcomes.push(self.attempt_tier(job, tier, budget, category).await?);
                }
                outcomes
            }
            ExecutionMode::Parallel => join_all(
                budgets
                    .into_iter()
                    .map(|(tier, budget)| self.attempt_tier(job, tier, budget, category)),
            )
            .await
            .into_iter()
            .collect::<OrchestratorResult<Vec<_>>>()?,
        };

        Ok(outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                TierOutcome::Answered(result) if !result.is_refusal() => Some(result),
                _ => None,
            })
            .collect())
    }

    /// Publish one request and wait for it to be answered, time out, or be abandoned
    async fn attempt_tier(
        &self,
        job: &QueryJob,
        tier: usize,
        timeout: Duration,
        category: Option<&str>,
    ) -> OrchestratorResult<TierOutcome> {
        let tier_config = self.settings.tier(tier)?;
        let engine = tier_config.engine.clone();
        let query_id = job.id.to_string();

        let mut context = HashMap::from([("tier_name".to_string(), tier_config.name.clone())]);
        if let Some(category) = category {
            context.insert("category".to_string(), category.to_string());
        }
        let request = TierRequest {
            query_id: job.id,
            tier,
            engine: engine.clone(),
            query: job.query.clone(),
            context,
            created_at: Utc::now(),
            timeout_ms: timeout.as_millis() as u64,
        };

        self.publish(&request).await?;
        self.feed.increment_metric(&format!("tier:{tier}:requests")).await;
        self.feed
            .log_event(
                &query_id,
                "escalated",
                EventLevel::Info,
                details(json!({ "tier": tier, "engine": engine, "timeout_ms": request.timeout_ms })),
            )
            .await;

        let watch = ResultWatch {
            result_key: keys::tier_result(&job.id, tier),
            dead_key: keys::dead_engines(&job.id),
            engine: engine.clone(),
            alive_key: Some(keys::worker_alive(&engine)),
        };
        let started = Instant::now();

        match self.awaiter.await_result(&self.store, &watch, timeout).await? {
            Awaited::Ready(raw) => {
                self.release(&request).await?;
                let decoded = serde_json::from_str::<TierResult>(&raw)
                    .map_err(|e| e.to_string())
                    .and_then(|result| {
                        if result.has_valid_confidence() {
                            Ok(result)
                        } else {
                            Err(format!("confidence {} outside [0, 1]", result.confidence))
                        }
                    });
                let result = match decoded {
                    Ok(result) => result,
                    Err(error) => {
                        let elapsed = started.elapsed().as_millis() as u64;
                        self.feed
                            .log_event(
                                &query_id,
                                "malformed_result",
                                EventLevel::Warn,
                                details(json!({ "tier": tier, "engine": engine, "error": error })),
                            )
                            .await;
                        TierResult::refusal(&engine, format!("malformed result: {error}"), elapsed)
                    }
                };
                self.feed.record_latency(&engine, result.latency_ms).await;
                self.feed
                    .log_event(
                        &query_id,
                        "tier_result",
                        EventLevel::Debug,
                        details(json!({
                            "tier": tier,
                            "engine": engine,
                            "confidence": result.confidence,
                            "latency_ms": result.latency_ms,
                        })),
                    )
                    .await;
                Ok(TierOutcome::Answered(result))
            }
            Awaited::TimedOut => {
                self.withdraw(&request).await?;
                self.feed.increment_metric(&format!("tier:{tier}:timeouts")).await;
                let error = OrchestratorError::TierTimeout { tier, engine: engine.clone(), timeout };
                self.feed
                    .log_event(
                        &query_id,
                        "tier_timeout",
                        EventLevel::Info,
                        details(json!({ "tier": tier, "engine": engine, "message": error.to_string() })),
                    )
                    .await;
                Ok(TierOutcome::TimedOut)
            }
            Awaited::Abandoned => {
                self.withdraw(&request).await?;
                let error = OrchestratorError::WorkerDead { worker: engine.clone() };
                self.feed
                    .log_event(
                        &query_id,
                        "worker_dead_escalation",
                        EventLevel::Warn,
                        details(json!({
                            "tier": tier,
                            "engine": engine,
                            "waited_ms": started.elapsed().as_millis() as u64,
                            "message": error.to_string(),
                        })),
                    )
                    .await;
                Ok(TierOutcome::WorkerDead)
            }
        }
    }

    /// Request first, queue entry last, so a claimer always finds the request
    async fn publish(&self, request: &TierRequest) -> OrchestratorResult<()> {
        let query_id = request.query_id;
        put_json(&self.store, &keys::tier_request(&query_id, request.tier), request).await?;
        self.store.add_to_set(&keys::pending(&query_id), &request.engine).await?;
        self.store
            .add_to_set(&keys::worker_assigned(&request.engine), &query_id.to_string())
            .await?;
        self.store
            .add_to_set(&keys::work_queue(&request.engine), &request.work_item().to_string())
            .await?;
        Ok(())
    }

    /// The engine answered; it no longer owes this query anything
    async fn release(&self, request: &TierRequest) -> OrchestratorResult<()> {
        self.store.remove_from_set(&keys::pending(&request.query_id), &request.engine).await?;
        self.store
            .remove_from_set(&keys::worker_assigned(&request.engine), &request.query_id.to_string())
            .await?;
        Ok(())
    }

    /// Give up on a request so nobody picks it up later
    async fn withdraw(&self, request: &TierRequest) -> OrchestratorResult<()> {
        self.store
            .remove_from_set(&keys::work_queue(&request.engine), &request.work_item().to_string())
            .await?;
        self.release(request).await
    }

    async fn save_job(&self, job: &QueryJob) -> OrchestratorResult<()> {
        put_json(&self.store, &keys::query_state(&job.id), job).await?;
        Ok(())
    }

    async fn finalize(
        &self,
        job: &mut QueryJob,
        plan: &EscalationPlan,
        resolution: Resolution,
    ) -> OrchestratorResult<Resolution> {
        put_json(&self.store, &keys::final_result(&job.id), &resolution).await?;
        // Terminal from here on; nothing may replace the recorded answer
        job.state = if resolution.method.is_soft_failure() {
            QueryState::FailedSoft
        } else {
            QueryState::Complete
        };
        job.result = Some(resolution.clone());
        job.finished_at = Some(Utc::now());
        self.save_job(job).await?;
        self.feed
            .log_event(
                &job.id.to_string(),
                "finalized",
                EventLevel::Info,
                details(json!({
                    "method": resolution.method,
                    "confidence": resolution.confidence,
                    "tiers_attempted": resolution.tiers_attempted,
                })),
            )
            .await;
        if let Err(e) = self.cleanup(job, plan).await {
            process_warn!(ProcessId::current(), "⚠️ Retention cleanup for {} incomplete: {}", job.id, e);
        }
        Ok(resolution)
    }

    /// Empty the pending set and start the retention clock on every key of the query
    async fn cleanup(&self, job: &QueryJob, plan: &EscalationPlan) -> OrchestratorResult<()> {
        let pending = keys::pending(&job.id);
        for engine in self.store.members(&pending).await? {
            self.store.remove_from_set(&pending, &engine).await?;
        }
        for key in keys::query_keys(&job.id, plan.attempted().iter().copied()) {
            self.store.set_expiry(&key, self.settings.retention).await?;
        }
        Ok(())
    }

    /// Turn an error that escaped the escalation loop into a soft answer
    async fn fail_soft(&self, job: &mut QueryJob, plan: &EscalationPlan, error: OrchestratorError) -> Resolution {
        logging::log_error(ProcessId::current(), &format!("Query {}", job.id), &error);
        if let Some(recorded) = &job.result {
            return recorded.clone();
        }
        let method = if error.is_store_unavailable() {
            ResolutionMethod::StoreUnavailable
        } else {
            ResolutionMethod::Exhausted
        };
        let resolution = Resolution::soft_failure(job.id, method, plan.attempted().to_vec());

        // Best effort: the store may well be the thing that failed
        let recorded = self.finalize(job, plan, resolution.clone()).await;
        if let Err(e) = recorded {
            process_debug!(ProcessId::current(), "🔇 Could not record soft failure for {}: {}", job.id, e);
        }
        job.state = QueryState::FailedSoft;
        job.result = Some(resolution.clone());
        resolution
    }
}
