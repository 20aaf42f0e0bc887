//! Worker binary entry point
//!
//! Every flag can also come from the environment, which is how the
//! orchestrator configures the workers it spawns.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use shared::{logging, process_debug, CoordinationStore, ProcessId, TcpStore, WorkerPlacement};
use worker::{parse_capabilities, SimulatedEngine, Worker, WorkerResult, WorkerSettings};

#[derive(Parser)]
#[command(name = "worker")]
#[command(about = "Serves one inference engine for the tiered query resolver")]
struct Args {
    /// Worker name; requests for the engine of the same name are served
    #[arg(long, env = "ESCALATE_WORKER_NAME")]
    name: String,

    /// Comma-separated remote tiers this worker serves
    #[arg(long, env = "ESCALATE_WORKER_CAPABILITIES", default_value = "1")]
    capabilities: String,

    #[arg(long, env = "ESCALATE_STORE_HOST", default_value = "127.0.0.1")]
    store_host: String,

    #[arg(long, env = "ESCALATE_STORE_PORT", default_value = "7400")]
    store_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ESCALATE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Confidence the simulated engine reports
    #[arg(long, default_value = "0.8")]
    confidence: f64,

    /// Maximum random deviation from the configured confidence
    #[arg(long, default_value = "0.0")]
    confidence_jitter: f64,

    /// Simulated inference latency
    #[arg(long, default_value = "50")]
    latency_ms: u64,

    /// Maximum extra random latency
    #[arg(long, default_value = "0")]
    latency_jitter_ms: u64,

    /// Fraction of requests that fail
    #[arg(long, default_value = "0.0")]
    failure_rate: f64,

    #[arg(long, default_value = "10")]
    poll_interval_ms: u64,

    #[arg(long, default_value = "500")]
    heartbeat_interval_ms: u64,

    /// Host to advertise when running on another machine than the orchestrator
    #[arg(long)]
    advertise_host: Option<String>,

    #[arg(long, default_value = "0")]
    advertise_port: u16,
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM from the orchestrator
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => logging::log_error(ProcessId::current(), "Installing SIGTERM handler", &e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        logging::log_error(ProcessId::current(), "Signal handling", &e);
    }
}

#[tokio::main]
async fn main() -> WorkerResult<()> {
    let args = Args::parse();

    ProcessId::init_worker(&args.name);
    logging::init_tracing(Some(&args.log_level));
    logging::log_startup(ProcessId::current(), &format!("worker {}", args.name));

    let placement = match &args.advertise_host {
        Some(host) => WorkerPlacement::Remote { host: host.clone(), port: args.advertise_port },
        None => WorkerPlacement::Local { pid: Some(std::process::id()) },
    };
    let settings = WorkerSettings::new(&args.name)
        .with_capabilities(parse_capabilities(&args.capabilities)?)
        .with_placement(placement)
        .with_poll_interval(Duration::from_millis(args.poll_interval_ms))
        .with_heartbeat_interval(Duration::from_millis(args.heartbeat_interval_ms));

    let engine = SimulatedEngine::new(&args.name, args.confidence)
        .with_latency(Duration::from_millis(args.latency_ms))
        .with_jitter(args.confidence_jitter, Duration::from_millis(args.latency_jitter_ms))
        .with_failure_rate(args.failure_rate);

    let store = TcpStore::new(&args.store_host, args.store_port);
    store.ping().await?;
    process_debug!(ProcessId::current(), "🗄️ Connected to coordination store at {}", store.address());
    let store: Arc<dyn CoordinationStore> = Arc::new(store);

    let mut worker = Worker::new(settings, store, engine);
    let shutdown = worker.shutdown_sender();
    tokio::spawn(async move {
        shutdown_signal().await;
        logging::log_shutdown(ProcessId::current(), "Received shutdown signal");
        let _ = shutdown.send(()).await;
    });

    worker.run().await?;

    logging::log_success(ProcessId::current(), "Worker stopped gracefully");
    Ok(())
}
