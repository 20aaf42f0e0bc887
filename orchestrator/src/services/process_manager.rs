//! Real process management service implementation
//!
//! Spawns locally placed workers, tracks their children, and stops them with
//! SIGTERM followed by a kill if they do not exit in time.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::process_output_handler::{configure_child_stdio, spawn_output_relays, OutputMode};
use crate::config::{WorkerConfig, WorkerKind};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::ProcessManager;
use shared::{process_debug, process_info, process_warn, ProcessId};

/// Handle for a managed worker process
struct ManagedWorker {
    child: Child,
    pid: u32,
    started: Instant,
}

pub struct RealProcessManager {
    workers: Mutex<HashMap<String, ManagedWorker>>,
    store_host: String,
    store_port: u16,
    log_level: String,
    output: OutputMode,
    stop_grace: Duration,
}

impl RealProcessManager {
    pub fn new(store_host: &str, store_port: u16) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            store_host: store_host.to_string(),
            store_port,
            log_level: "info".to_string(),
            output: OutputMode::Inherit,
            stop_grace: Duration::from_secs(3),
        }
    }

    /// Configure log level passed to workers (fluent API)
    pub fn with_log_level(mut self, log_level: &str) -> Self {
        self.log_level = log_level.to_string();
        self
    }

    /// Configure how worker output is surfaced (fluent API)
    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// Configure how long a worker gets to exit after SIGTERM (fluent API)
    pub fn with_stop_grace(mut self, stop_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self
    }

    fn build_command(&self, worker: &WorkerConfig) -> OrchestratorResult<Command> {
        let WorkerKind::Local { command, args } = &worker.kind else {
            return Err(OrchestratorError::WorkerSpawnFailed {
                worker: worker.name.clone(),
                reason: "remote workers are not spawned locally".to_string(),
            });
        };

        let capabilities = worker
            .capabilities
            .iter()
            .map(|tier| tier.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .env("ESCALATE_WORKER_NAME", &worker.name)
            .env("ESCALATE_WORKER_CAPABILITIES", capabilities)
            .env("ESCALATE_STORE_HOST", &self.store_host)
            .env("ESCALATE_STORE_PORT", self.store_port.to_string())
            .env("ESCALATE_LOG_LEVEL", &self.log_level)
            .kill_on_drop(true);
        configure_child_stdio(&mut cmd, self.output, &worker.name);
        Ok(cmd)
    }

    /// Check if a process is still running
    fn is_process_running(child: &mut Child) -> bool {
        match child.try_wait() {
            Ok(None) => true,     // Still running
            Ok(Some(_)) => false, // Exited
            Err(_) => false,      // Error checking status
        }
    }

    #[cfg(unix)]
    fn request_termination(pid: u32) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
    }

    #[cfg(not(unix))]
    fn request_termination(_pid: u32) -> bool {
        false
    }

    async fn shutdown(&self, name: &str, mut worker: ManagedWorker) {
        if Self::request_termination(worker.pid) {
            match tokio::time::timeout(self.stop_grace, worker.child.wait()).await {
                Ok(_) => {
                    process_debug!(ProcessId::current(), "🛑 Worker {} exited after SIGTERM", name);
                    return;
                }
                Err(_) => {
                    process_warn!(
                        ProcessId::current(),
                        "⚠️ Worker {} ignored SIGTERM for {:?}, killing",
                        name,
                        self.stop_grace
                    );
                }
            }
        }
        let _ = worker.child.kill().await;
        let _ = worker.child.wait().await;
        process_debug!(
            ProcessId::current(),
            "🛑 Stopped worker {} after {:?}",
            name,
            worker.started.elapsed()
        );
    }

    pub async fn running_count(&self) -> usize {
        let mut workers = self.workers.lock().await;
        workers
            .values_mut()
            .filter_map(|w| Self::is_process_running(&mut w.child).then_some(()))
            .count()
    }
}

#[async_trait]
impl ProcessManager for RealProcessManager {
    async fn spawn_worker(&self, worker: &WorkerConfig) -> OrchestratorResult<u32> {
        // A leftover child under this name is replaced
        let previous = self.workers.lock().await.remove(&worker.name);
        if let Some(previous) = previous {
            self.shutdown(&worker.name, previous).await;
        }

        let mut cmd = self.build_command(worker)?;
        let mut child = cmd.spawn().map_err(|e| OrchestratorError::WorkerSpawnFailed {
            worker: worker.name.clone(),
            reason: e.to_string(),
        })?;
        if self.output == OutputMode::Relay {
            spawn_output_relays(&mut child, &worker.name);
        }

        let pid = child.id().unwrap_or(0);
        self.workers.lock().await.insert(
            worker.name.clone(),
            ManagedWorker { child, pid, started: Instant::now() },
        );

        process_info!(ProcessId::current(), "🏭 Spawned worker {} (PID: {})", worker.name, pid);
        Ok(pid)
    }

    async fn is_running(&self, name: &str) -> OrchestratorResult<bool> {
        let mut workers = self.workers.lock().await;
        Ok(workers
            .get_mut(name)
            .is_some_and(|worker| Self::is_process_running(&mut worker.child)))
    }

    async fn stop_worker(&self, name: &str) -> OrchestratorResult<()> {
        let worker = self.workers.lock().await.remove(name);
        if let Some(worker) = worker {
            self.shutdown(name, worker).await;
        }
        Ok(())
    }

    async fn stop_all(&self) -> OrchestratorResult<()> {
        let drained: Vec<(String, ManagedWorker)> = self.workers.lock().await.drain().collect();
        let count = drained.len();
        for (name, worker) in drained {
            self.shutdown(&name, worker).await;
        }
        process_debug!(ProcessId::current(), "🛑 All {} worker processes stopped", count);
        Ok(())
    }
}
