//! Coordination store server
//!
//! Hosts one in-memory coordination store over TCP for the orchestrator and
//! its workers, and evicts expired keys in the background.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use shared::{logging, process_info, MemoryStore, ProcessId, SharedError, SharedResult, StoreServer};

#[derive(Parser)]
#[command(name = "storeserver")]
#[command(about = "Coordination store for the tiered query resolver")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "ESCALATE_STORE_BIND", default_value = "127.0.0.1:7400")]
    bind: SocketAddr,

    /// How often expired keys are evicted
    #[arg(long, default_value = "1000")]
    sweep_interval_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ESCALATE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> SharedResult<()> {
    let args = Args::parse();

    ProcessId::init_store_server();
    logging::init_tracing(Some(&args.log_level));
    logging::log_startup(ProcessId::current(), &format!("coordination store on {}", args.bind));

    let listener = TcpListener::bind(args.bind)
        .await
        .map_err(|e| SharedError::unavailable(format!("cannot bind {}: {e}", args.bind)))?;
    let server = StoreServer::new(Arc::new(MemoryStore::new()));
    let sweeper = server.spawn_expiry_sweeper(Duration::from_millis(args.sweep_interval_ms));
    process_info!(ProcessId::current(), "🗄️ Listening on {}", args.bind);

    tokio::select! {
        result = server.serve(listener) => {
            if let Err(e) = &result {
                logging::log_error(ProcessId::current(), "Store server", e);
            }
            result?;
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                logging::log_error(ProcessId::current(), "Signal handling", &e);
            }
            logging::log_shutdown(ProcessId::current(), "Received Ctrl+C signal");
        }
    }

    sweeper.abort();
    logging::log_success(ProcessId::current(), "Store server stopped");
    Ok(())
}
