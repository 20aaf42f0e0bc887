//! Helper to handle worker process stdout/stderr output
//!
//! Workers either inherit the orchestrator's terminal, or have their output
//! piped and re-logged line by line under the worker's name.

use shared::{process_debug, process_info, process_warn, ProcessId};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// How a worker's output reaches the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Child writes straight to our stdout/stderr
    #[default]
    Inherit,
    /// Child output is captured and re-emitted through tracing
    Relay,
}

pub fn configure_child_stdio(cmd: &mut Command, mode: OutputMode, worker: &str) {
    cmd.stdin(Stdio::null());
    match mode {
        OutputMode::Inherit => {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            process_debug!(ProcessId::current(), "🔗 {} output goes to the parent terminal", worker);
        }
        OutputMode::Relay => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            process_debug!(ProcessId::current(), "📡 {} output is relayed through tracing", worker);
        }
    }
}

/// Drain piped output so the child never blocks on a full pipe
pub fn spawn_output_relays(child: &mut Child, worker: &str) {
    if let Some(stdout) = child.stdout.take() {
        let worker = worker.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                process_info!(ProcessId::current(), "[{}] {}", worker, line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let worker = worker.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                process_warn!(ProcessId::current(), "[{} stderr] {}", worker, line);
            }
        });
    }
}
