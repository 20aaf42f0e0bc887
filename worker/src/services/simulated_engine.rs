//! Simulated inference engine
//!
//! Answers every query with a configured confidence after a configured
//! latency, both optionally jittered, and fails a configured fraction of
//! requests. Stands in for real model inference in demos and tests.

use async_trait::async_trait;
use rand::Rng;
use shared::TierRequest;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};
use crate::traits::{EngineAnswer, InferenceEngine};

#[derive(Debug, Clone)]
pub struct SimulatedEngine {
    name: String,
    confidence: f64,
    confidence_jitter: f64,
    latency: Duration,
    latency_jitter: Duration,
    failure_rate: f64,
}

impl SimulatedEngine {
    pub fn new(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            confidence: confidence.clamp(0.0, 1.0),
            confidence_jitter: 0.0,
            latency: Duration::ZERO,
            latency_jitter: Duration::ZERO,
            failure_rate: 0.0,
        }
    }

    /// Configure base latency (fluent API)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Configure random spread around confidence and latency (fluent API)
    pub fn with_jitter(mut self, confidence: f64, latency: Duration) -> Self {
        self.confidence_jitter = confidence.abs();
        self.latency_jitter = latency;
        self
    }

    /// Configure the fraction of requests that fail (fluent API)
    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate.clamp(0.0, 1.0);
        self
    }

    /// Draw this request's latency, confidence and fate
    fn roll(&self) -> (Duration, f64, bool) {
        let mut rng = rand::thread_rng();

        let mut latency = self.latency;
        if !self.latency_jitter.is_zero() {
            latency += Duration::from_millis(rng.gen_range(0..=self.latency_jitter.as_millis() as u64));
        }

        let mut confidence = self.confidence;
        if self.confidence_jitter > 0.0 {
            confidence += rng.gen_range(-self.confidence_jitter..=self.confidence_jitter);
        }

        let failed = self.failure_rate > 0.0 && rng.gen_bool(self.failure_rate);
        (latency, confidence.clamp(0.0, 1.0), failed)
    }
}

#[async_trait]
impl InferenceEngine for SimulatedEngine {
    async fn infer(&self, request: &TierRequest) -> WorkerResult<EngineAnswer> {
        let (latency, confidence, failed) = self.roll();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if failed {
            return Err(WorkerError::engine(&self.name, "simulated failure"));
        }

        Ok(EngineAnswer {
            answer: format!("[{}] {}", self.name, request.query),
            confidence,
            provenance: vec![format!("engine:{}", self.name), format!("tier:{}", request.tier)],
        })
    }
}
