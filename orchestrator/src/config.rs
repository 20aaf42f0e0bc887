//! Orchestrator configuration
//!
//! ## Configuration Sources
//! Values are resolved in this order, later sources winning:
//! 1. Built-in defaults
//! 2. A TOML file (`--config`)
//! 3. Environment variables, including a `.env` file if present
//! 4. Command line flags (applied by the binary)
//!
//! ## Environment Variables
//! - `ESCALATE_STORE_HOST`, `ESCALATE_STORE_PORT`: networked store address
//! - `ESCALATE_CONSENSUS`: consensus strategy tag
//! - `ESCALATE_EXECUTION_MODE`: `serial` or `parallel`
//! - `ESCALATE_LOG_LEVEL`, `ESCALATE_DIAGNOSTIC_LEVEL`
//! - `ESCALATE_LOCAL_THRESHOLD`
//! - `ESCALATE_TIER_<N>_TIMEOUT_MS`, `ESCALATE_TIER_<N>_THRESHOLD`

use serde::{Deserialize, Serialize};
use shared::{process_warn, ConsensusStrategy, EventLevel, ProcessId};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Where the coordination store lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Run an in-process store instead of connecting to a store server
    pub embedded: bool,
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            embedded: false,
            host: "127.0.0.1".to_string(),
            port: 7400,
            timeout_ms: 2000,
        }
    }
}

/// Tier 0: the local lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalTierConfig {
    pub threshold: f64,
    /// JSON fact file for the built-in keyword index
    pub facts_path: Option<PathBuf>,
}

impl Default for LocalTierConfig {
    fn default() -> Self {
        Self { threshold: 0.85, facts_path: None }
    }
}

/// One remote tier, in ascending cost order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    /// Worker name that serves this tier
    pub engine: String,
    pub timeout_ms: u64,
    /// Minimum confidence to accept; 0.0 accepts any non-refusal answer
    pub threshold: f64,
}

impl TierConfig {
    pub fn new(name: &str, engine: &str, timeout_ms: u64, threshold: f64) -> Self {
        Self {
            name: name.to_string(),
            engine: engine.to_string(),
            timeout_ms,
            threshold,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// How a statically configured worker is reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerKind {
    /// Spawned and supervised by the orchestrator
    Local {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Runs elsewhere and registers itself through the store
    Remote { host: String, port: u16 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: WorkerKind,
    /// Tier indices this worker serves
    #[serde(default)]
    pub capabilities: BTreeSet<usize>,
    #[serde(default = "default_auto_restart")]
    pub auto_restart: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_auto_restart() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

impl WorkerConfig {
    pub fn is_local(&self) -> bool {
        matches!(self.kind, WorkerKind::Local { .. })
    }
}

/// When to ask an additional tier before escalating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondOpinionConfig {
    pub enabled: bool,
    /// Borderline band, inclusive low and exclusive high
    pub low: f64,
    pub high: f64,
    /// How many further tiers to consult
    pub extra_tiers: usize,
    /// Restrict to these query categories (empty means all)
    pub categories: Vec<String>,
}

impl Default for SecondOpinionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            low: 0.6,
            high: 0.75,
            extra_tiers: 1,
            categories: Vec::new(),
        }
    }
}

/// How second-opinion requests are awaited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Serial,
    Parallel,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Serial
    }
}

impl FromStr for ExecutionMode {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "serial" => Ok(ExecutionMode::Serial),
            "parallel" => Ok(ExecutionMode::Parallel),
            other => Err(OrchestratorError::config(format!("execution_mode = {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Heartbeat age after which a worker is dead
    pub grace_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { grace_ms: 3000, sweep_interval_ms: 500 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Lowest event level persisted to the store
    pub level: EventLevel,
    /// Tracing level for this process
    pub log_level: String,
    /// How long terminal queries stay in the store
    pub retention_secs: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            level: EventLevel::Info,
            log_level: "info".to_string(),
            retention_secs: 3600,
        }
    }
}

/// Complete orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub store: StoreConfig,
    pub local_tier: LocalTierConfig,
    pub tiers: Vec<TierConfig>,
    pub workers: Vec<WorkerConfig>,
    pub consensus: ConsensusStrategy,
    pub second_opinion: SecondOpinionConfig,
    pub execution_mode: ExecutionMode,
    pub health: HealthConfig,
    pub poll_interval_ms: u64,
    pub diagnostics: DiagnosticsConfig,
    /// Category name to keywords, for query classification
    pub categories: BTreeMap<String, Vec<String>>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            local_tier: LocalTierConfig::default(),
            tiers: vec![
                TierConfig::new("fast", "fast", 2000, 0.75),
                TierConfig::new("generative", "generative", 10_000, 0.0),
            ],
            workers: Vec::new(),
            consensus: ConsensusStrategy::PassThrough,
            second_opinion: SecondOpinionConfig::default(),
            execution_mode: ExecutionMode::Serial,
            health: HealthConfig::default(),
            poll_interval_ms: 10,
            diagnostics: DiagnosticsConfig::default(),
            categories: BTreeMap::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from an optional TOML file, then apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> OrchestratorResult<Self> {
        Self::init_env();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> OrchestratorResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> OrchestratorResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load `.env` from the current directory or its parents, if there is one
    fn init_env() {
        let _ = dotenv::dotenv();
    }

    /// Apply overrides from a variable lookup (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> OrchestratorResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("ESCALATE_STORE_HOST") {
            self.store.host = host;
        }
        if let Some(port) = lookup("ESCALATE_STORE_PORT") {
            self.store.port = parse_field("ESCALATE_STORE_PORT", &port)?;
        }
        if let Some(strategy) = lookup("ESCALATE_CONSENSUS") {
            self.consensus = strategy.parse()?;
        }
        if let Some(mode) = lookup("ESCALATE_EXECUTION_MODE") {
            self.execution_mode = mode.parse()?;
        }
        if let Some(level) = lookup("ESCALATE_LOG_LEVEL") {
            self.diagnostics.log_level = level;
        }
        if let Some(level) = lookup("ESCALATE_DIAGNOSTIC_LEVEL") {
            self.diagnostics.level = level.parse()?;
        }
        if let Some(threshold) = lookup("ESCALATE_LOCAL_THRESHOLD") {
            self.local_tier.threshold = parse_field("ESCALATE_LOCAL_THRESHOLD", &threshold)?;
        }

        for (position, tier) in self.tiers.iter_mut().enumerate() {
            let index = position + 1;
            let timeout_key = format!("ESCALATE_TIER_{index}_TIMEOUT_MS");
            if let Some(timeout) = lookup(&timeout_key) {
                tier.timeout_ms = parse_field(&timeout_key, &timeout)?;
            }
            let threshold_key = format!("ESCALATE_TIER_{index}_THRESHOLD");
            if let Some(threshold) = lookup(&threshold_key) {
                tier.threshold = parse_field(&threshold_key, &threshold)?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.tiers.is_empty() {
            return Err(OrchestratorError::config("tiers: at least one remote tier is required"));
        }
        check_threshold("local_tier.threshold", self.local_tier.threshold)?;

        let mut engines = HashSet::new();
        for (position, tier) in self.tiers.iter().enumerate() {
            let index = position + 1;
            check_threshold(&format!("tiers[{index}].threshold"), tier.threshold)?;
            if !engines.insert(tier.engine.as_str()) {
                return Err(OrchestratorError::config(format!(
                    "tiers[{index}].engine {} already serves another tier",
                    tier.engine
                )));
            }
            if tier.timeout_ms == 0 {
                return Err(OrchestratorError::config(format!("tiers[{index}].timeout_ms must be positive")));
            }
            if tier.engine.trim().is_empty() {
                return Err(OrchestratorError::config(format!("tiers[{index}].engine is empty")));
            }
        }

        let mut names = HashSet::new();
        for worker in &self.workers {
            if !names.insert(worker.name.as_str()) {
                return Err(OrchestratorError::config(format!("workers: duplicate name {}", worker.name)));
            }
            if let Some(tier) = worker.capabilities.iter().find(|&&t| t == 0 || t > self.tiers.len()) {
                return Err(OrchestratorError::config(format!(
                    "workers.{}: capability {tier} is not a remote tier",
                    worker.name
                )));
            }
        }

        let band = &self.second_opinion;
        if band.enabled && (!(0.0..=1.0).contains(&band.low) || !(0.0..=1.0).contains(&band.high) || band.low > band.high)
        {
            return Err(OrchestratorError::config("second_opinion: band must satisfy 0 <= low <= high"));
        }
        if self.poll_interval_ms == 0 {
            return Err(OrchestratorError::config("poll_interval_ms must be positive"));
        }
        if self.health.grace_ms == 0 || self.health.sweep_interval_ms == 0 {
            return Err(OrchestratorError::config("health: grace_ms and sweep_interval_ms must be positive"));
        }

        // Engines may self-register later, so an unknown one is only worth a warning
        for tier in &self.tiers {
            if !self.workers.is_empty() && !names.contains(tier.engine.as_str()) {
                process_warn!(
                    ProcessId::current(),
                    "⚠️ Tier '{}' engine '{}' is not a configured worker; expecting self-registration",
                    tier.name,
                    tier.engine
                );
            }
        }
        Ok(())
    }

    /// Configuration for a remote tier (1-based)
    pub fn tier(&self, index: usize) -> Option<&TierConfig> {
        index.checked_sub(1).and_then(|position| self.tiers.get(position))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.diagnostics.retention_secs)
    }
}

fn parse_field<T: FromStr>(field: &str, value: &str) -> OrchestratorResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| OrchestratorError::config(format!("{field} = {value}")))
}

fn check_threshold(field: &str, value: f64) -> OrchestratorResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(OrchestratorError::config(format!("{field} = {value} is outside [0, 1]")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE: &str = r#"
consensus = "weighted-average"
execution_mode = "parallel"
poll_interval_ms = 5

[store]
host = "10.0.0.5"
port = 7500

[local_tier]
threshold = 0.9

[[tiers]]
name = "fast"
engine = "fast-1"
timeout_ms = 800
threshold = 0.8

[[tiers]]
name = "generative"
engine = "heavy-1"
timeout_ms = 15000
threshold = 0.0

[[workers]]
name = "fast-1"
type = "local"
command = "./target/debug/worker"
args = ["--confidence", "0.8"]
capabilities = [1]
max_retries = 5

[[workers]]
name = "heavy-1"
type = "remote"
host = "gpu-box"
port = 9000
capabilities = [2]
auto_restart = false

[second_opinion]
enabled = true
low = 0.6
high = 0.8

[categories]
physics = ["force", "energy", "motion"]
"#;

    #[test]
    fn test_parse_full_file() {
        let config = OrchestratorConfig::from_toml(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.consensus, ConsensusStrategy::WeightedAverage);
        assert_eq!(config.execution_mode, ExecutionMode::Parallel);
        assert_eq!(config.store.host, "10.0.0.5");
        assert_eq!(config.tiers.len(), 2);
        assert_eq!(config.tier(1).unwrap().engine, "fast-1");
        assert!(config.tier(0).is_none());
        assert!(config.tier(3).is_none());

        let fast = &config.workers[0];
        assert!(fast.is_local());
        assert_eq!(fast.max_retries, 5);
        assert!(fast.auto_restart);
        assert_eq!(fast.backoff_ms, 1000);
        assert_eq!(
            config.workers[1].kind,
            WorkerKind::Remote { host: "gpu-box".to_string(), port: 9000 }
        );
        assert_eq!(config.categories["physics"].len(), 3);
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = OrchestratorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.local_tier.threshold, 0.85);
        assert_eq!(config.tier(1).unwrap().threshold, 0.75);
        assert_eq!(config.tier(2).unwrap().threshold, 0.0);
    }

    #[test]
    fn test_environment_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("ESCALATE_STORE_PORT", "7777"),
            ("ESCALATE_CONSENSUS", "simple-average"),
            ("ESCALATE_TIER_1_TIMEOUT_MS", "250"),
            ("ESCALATE_TIER_2_THRESHOLD", "0.1"),
            ("ESCALATE_DIAGNOSTIC_LEVEL", "debug"),
        ]);
        let mut config = OrchestratorConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.store.port, 7777);
        assert_eq!(config.consensus, ConsensusStrategy::SimpleAverage);
        assert_eq!(config.tiers[0].timeout_ms, 250);
        assert_eq!(config.tiers[1].threshold, 0.1);
        assert_eq!(config.diagnostics.level, EventLevel::Debug);
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let mut config = OrchestratorConfig::default();
        let result = config.apply_overrides(|key| (key == "ESCALATE_STORE_PORT").then(|| "not-a-port".to_string()));
        assert!(matches!(result, Err(OrchestratorError::ConfigurationError { .. })));

        let result = config.apply_overrides(|key| (key == "ESCALATE_CONSENSUS").then(|| "majority".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = OrchestratorConfig::default();
        config.tiers[0].threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.tiers.clear();
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::from_toml(SAMPLE).unwrap();
        config.workers[1].name = "fast-1".to_string();
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::from_toml(SAMPLE).unwrap();
        config.workers[0].capabilities.insert(7);
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.tiers[1].engine = "fast".to_string();
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.second_opinion.enabled = true;
        config.second_opinion.low = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = OrchestratorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.store.port, 7500);

        let missing = OrchestratorConfig::from_file(Path::new("/nonexistent/escalate.toml"));
        assert!(missing.is_err());
    }
}
