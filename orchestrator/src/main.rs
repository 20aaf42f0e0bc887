//! Main entry point for the orchestrator binary
//!
//! Wires the real services together: the coordination store (embedded or
//! remote), the local fact index, the worker registry with its health loop,
//! and the query orchestrator. Queries given on the command line are resolved
//! and printed as JSON; without queries the process supervises workers until
//! Ctrl+C.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;

use orchestrator::{
    services::OutputMode, KeywordFactIndex, OrchestratorConfig, OrchestratorError, OrchestratorResult,
    QueryOrchestrator, RealProcessManager, WorkerRegistry,
};
use shared::{logging, process_debug, process_info, CoordinationStore, MemoryStore, ProcessId, TcpStore};

/// Tiered query resolution orchestrator
#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Resolves queries by escalating through local lookup and worker tiers")]
pub struct Args {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Query to resolve; repeat for several
    #[arg(long = "query", short = 'q')]
    pub queries: Vec<String>,

    /// Coordination store host (overrides config)
    #[arg(long)]
    pub store_host: Option<String>,

    /// Coordination store port (overrides config)
    #[arg(long)]
    pub store_port: Option<u16>,

    /// Use an in-process store instead of connecting to a store server
    #[arg(long)]
    pub embedded: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Consensus strategy (pass-through, simple-average, weighted-average, weighted-by-category)
    #[arg(long)]
    pub consensus: Option<String>,

    /// Relay worker output through the orchestrator's log instead of sharing the terminal
    #[arg(long)]
    pub relay_worker_output: bool,
}

impl Args {
    fn apply_to(&self, config: &mut OrchestratorConfig) -> OrchestratorResult<()> {
        if let Some(host) = &self.store_host {
            config.store.host = host.clone();
        }
        if let Some(port) = self.store_port {
            config.store.port = port;
        }
        if self.embedded {
            config.store.embedded = true;
        }
        if let Some(level) = &self.log_level {
            config.diagnostics.log_level = level.clone();
        }
        if let Some(strategy) = &self.consensus {
            config.consensus = strategy.parse()?;
        }
        config.validate()
    }
}

async fn connect_store(config: &OrchestratorConfig) -> OrchestratorResult<Arc<dyn CoordinationStore>> {
    if config.store.embedded {
        process_info!(ProcessId::current(), "🗄️ Using embedded coordination store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = TcpStore::new(&config.store.host, config.store.port)
        .with_timeout(Duration::from_millis(config.store.timeout_ms));
    store.ping().await?;
    process_info!(ProcessId::current(), "🗄️ Connected to coordination store at {}", store.address());
    Ok(Arc::new(store))
}

fn load_facts(config: &OrchestratorConfig) -> OrchestratorResult<KeywordFactIndex> {
    match &config.local_tier.facts_path {
        Some(path) => {
            let index = KeywordFactIndex::from_json_file(path)?;
            process_debug!(ProcessId::current(), "📚 Loaded {} facts from {}", index.len(), path.display());
            Ok(index)
        }
        None => Ok(KeywordFactIndex::new()),
    }
}

#[tokio::main]
async fn main() -> OrchestratorResult<()> {
    let args = Args::parse();

    ProcessId::init_orchestrator();

    let mut config = OrchestratorConfig::load(args.config.as_deref())?;
    args.apply_to(&mut config)?;
    logging::init_tracing(Some(&config.diagnostics.log_level));
    logging::log_startup(
        ProcessId::current(),
        &format!("orchestrator with {} tiers and {} workers", config.tiers.len(), config.workers.len()),
    );

    let store = connect_store(&config).await?;
    let lookup = load_facts(&config)?;

    let output = if args.relay_worker_output {
        OutputMode::Relay
    } else {
        OutputMode::Inherit
    };
    let process_manager = RealProcessManager::new(&config.store.host, config.store.port)
        .with_log_level(&config.diagnostics.log_level)
        .with_output(output);
    if config.store.embedded && config.workers.iter().any(|worker| worker.is_local()) {
        return Err(OrchestratorError::config(
            "local workers need a store server; run without --embedded",
        ));
    }

    let registry = Arc::new(WorkerRegistry::new(store.clone(), process_manager, &config));
    let started = registry.start_local_workers().await?;
    if !started.is_empty() {
        process_info!(ProcessId::current(), "🏭 Started local workers: {:?}", started);
    }

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let monitor = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.run(shutdown_rx).await })
    };

    let orchestrator = QueryOrchestrator::from_config(store.clone(), lookup, &config);

    if args.queries.is_empty() {
        process_info!(ProcessId::current(), "👀 No queries given; supervising workers until Ctrl+C");
        if let Err(err) = signal::ctrl_c().await {
            logging::log_error(ProcessId::current(), "Signal handling", &err);
        }
        logging::log_shutdown(ProcessId::current(), "Received Ctrl+C signal");
    } else {
        for resolution in orchestrator.resolve_all(&args.queries).await {
            println!("{}", serde_json::to_string_pretty(&resolution)?);
        }
    }

    let _ = shutdown_tx.send(()).await;
    let _ = monitor.await;
    registry.stop_all().await?;

    logging::log_success(ProcessId::current(), "Orchestrator stopped gracefully");
    Ok(())
}
