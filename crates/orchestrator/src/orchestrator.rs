// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker registry and lifecycle operations.
//!
//! The registry is one mutex over an insertion-ordered map; the lock is held
//! only for bookkeeping, never across process spawning or reaping. Children
//! are spawned detached into their own process group so graceful stop can
//! sweep grandchildren with a group signal.

use crate::worker::{PauseReason, WorkerRecord, WorkerState, WorkerStatus};
use indexmap::IndexMap;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vigil_core::{Clock, MetricsRegistry, SupervisorConfig, SystemClock, WorkerEntry};

/// Outbound event channel: `(kind, body)` handed to the telemetry client.
pub type EventSink = Box<dyn Fn(&str, serde_json::Value) + Send + Sync>;

/// Sink that drops events; for tests and headless setups.
pub fn noop_sink() -> EventSink {
    Box::new(|_, _| {})
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("duplicate worker name: {0}")]
    DuplicateName(String),

    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error("worker {0} is already running")]
    AlreadyRunning(String),

    #[error("worker {name} is {state:?}, expected {expected}")]
    InvalidState { name: String, state: WorkerState, expected: &'static str },

    #[error("invalid command for worker {name}: {reason}")]
    InvalidCommand { name: String, reason: String },

    #[error("failed to spawn worker {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal worker {name}: {source}")]
    Signal {
        name: String,
        #[source]
        source: nix::Error,
    },
}

/// Orchestrator settings, lifted from the supervisor record.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub watchdog_interval: Duration,
    pub max_restarts: u32,
    pub grace_period: Duration,
    /// Continuous uptime after which the restart counter resets
    pub stability_window: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_supervisor(&SupervisorConfig::default())
    }
}

impl OrchestratorConfig {
    pub fn from_supervisor(config: &SupervisorConfig) -> Self {
        Self {
            watchdog_interval: config.watchdog_interval,
            max_restarts: config.max_restarts,
            grace_period: config.grace_period,
            stability_window: config.restart_stability_window,
        }
    }
}

pub(crate) struct Inner<C: Clock> {
    pub config: OrchestratorConfig,
    pub workers: Mutex<IndexMap<String, WorkerRecord>>,
    pub metrics: Arc<MetricsRegistry>,
    pub sink: EventSink,
    pub clock: C,
    pub cancel: CancellationToken,
    pub watchdog: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to the worker supervisor.
pub struct Orchestrator<C: Clock = SystemClock> {
    pub(crate) inner: Arc<Inner<C>>,
}

impl<C: Clock> Clone for Orchestrator<C> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl Orchestrator<SystemClock> {
    pub fn new(config: OrchestratorConfig, metrics: Arc<MetricsRegistry>, sink: EventSink) -> Self {
        Self::with_clock(config, metrics, sink, SystemClock)
    }
}

impl<C: Clock> Orchestrator<C> {
    pub fn with_clock(
        config: OrchestratorConfig,
        metrics: Arc<MetricsRegistry>,
        sink: EventSink,
        clock: C,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                workers: Mutex::new(IndexMap::new()),
                metrics,
                sink,
                clock,
                cancel: CancellationToken::new(),
                watchdog: Mutex::new(None),
            }),
        }
    }

    /// Register a worker. Re-registering with identical arguments is a
    /// no-op; a different command or flag under a known name is an error.
    pub fn register(&self, entry: WorkerEntry) -> Result<(), OrchestratorError> {
        let argv = shell_words::split(&entry.command).map_err(|e| {
            OrchestratorError::InvalidCommand { name: entry.name.clone(), reason: e.to_string() }
        })?;
        if argv.is_empty() {
            return Err(OrchestratorError::InvalidCommand {
                name: entry.name.clone(),
                reason: "empty command".to_string(),
            });
        }
        let mut workers = self.inner.workers.lock();
        if let Some(existing) = workers.get(&entry.name) {
            if existing.spec == entry {
                return Ok(());
            }
            return Err(OrchestratorError::DuplicateName(entry.name));
        }
        tracing::info!(worker = %entry.name, essential = entry.essential, "worker registered");
        workers.insert(entry.name.clone(), WorkerRecord::new(entry, argv));
        Ok(())
    }

    /// Start one worker. Fails if it is already running or being started;
    /// a deliberate start from `GaveUp` resets the restart counter.
    pub fn start(&self, name: &str) -> Result<(), OrchestratorError> {
        let argv = {
            let mut workers = self.inner.workers.lock();
            let rec = workers
                .get_mut(name)
                .ok_or_else(|| OrchestratorError::UnknownWorker(name.to_string()))?;
            if rec.starting
                || matches!(rec.state, WorkerState::Running | WorkerState::Paused)
            {
                return Err(OrchestratorError::AlreadyRunning(name.to_string()));
            }
            rec.starting = true;
            rec.argv.clone()
        };

        let spawned = spawn_child(&argv);

        let mut workers = self.inner.workers.lock();
        let Some(rec) = workers.get_mut(name) else {
            return Err(OrchestratorError::UnknownWorker(name.to_string()));
        };
        rec.starting = false;
        match spawned {
            Ok(child) => {
                rec.pid = child.id();
                rec.child = Some(child);
                rec.state = WorkerState::Running;
                rec.last_start = Some(self.inner.clock.now());
                rec.restart_count = 0;
                rec.pause_reason = None;
                tracing::info!(worker = name, pid = ?rec.pid, "worker started");
                self.inner.metrics.incr_labeled("worker.starts", &[("name", name)]);
                Ok(())
            }
            Err(source) => {
                rec.state = WorkerState::Crashed;
                Err(OrchestratorError::Spawn { name: name.to_string(), source })
            }
        }
    }

    /// Start every registered worker. A spawn failure is fatal only to that
    /// worker: it is logged and left to the watchdog's restart budget.
    pub fn start_all(&self) {
        let names: Vec<String> = self.inner.workers.lock().keys().cloned().collect();
        for name in names {
            if let Err(e) = self.start(&name) {
                tracing::error!(worker = %name, error = %e, "failed to start worker");
            }
        }
    }

    /// Pause a worker (job-control stop). Pausing a paused worker is a
    /// no-op; any other non-running state is an error.
    pub fn pause(&self, name: &str) -> Result<(), OrchestratorError> {
        self.pause_with(name, PauseReason::Api)
    }

    pub(crate) fn pause_with(
        &self,
        name: &str,
        reason: PauseReason,
    ) -> Result<(), OrchestratorError> {
        let mut workers = self.inner.workers.lock();
        let rec = workers
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::UnknownWorker(name.to_string()))?;
        match rec.state {
            WorkerState::Paused => {
                tracing::debug!(worker = name, "pause on already-paused worker");
                return Ok(());
            }
            WorkerState::Running => {}
            state => {
                return Err(OrchestratorError::InvalidState {
                    name: name.to_string(),
                    state,
                    expected: "Running",
                })
            }
        }
        let pid = rec.pid.ok_or_else(|| OrchestratorError::InvalidState {
            name: name.to_string(),
            state: rec.state,
            expected: "Running",
        })?;
        kill(Pid::from_raw(pid as i32), Signal::SIGSTOP)
            .map_err(|source| OrchestratorError::Signal { name: name.to_string(), source })?;
        rec.state = WorkerState::Paused;
        rec.pause_reason = Some(reason);
        tracing::info!(worker = name, ?reason, "worker paused");
        self.inner.metrics.incr_labeled("worker.pauses", &[("name", name)]);
        Ok(())
    }

    /// Resume a paused worker (job-control continue). Resuming a running
    /// worker is a no-op.
    pub fn resume(&self, name: &str) -> Result<(), OrchestratorError> {
        let mut workers = self.inner.workers.lock();
        let rec = workers
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::UnknownWorker(name.to_string()))?;
        match rec.state {
            WorkerState::Running => {
                tracing::debug!(worker = name, "resume on running worker");
                return Ok(());
            }
            WorkerState::Paused => {}
            state => {
                return Err(OrchestratorError::InvalidState {
                    name: name.to_string(),
                    state,
                    expected: "Paused",
                })
            }
        }
        let pid = rec.pid.ok_or_else(|| OrchestratorError::InvalidState {
            name: name.to_string(),
            state: rec.state,
            expected: "Paused",
        })?;
        kill(Pid::from_raw(pid as i32), Signal::SIGCONT)
            .map_err(|source| OrchestratorError::Signal { name: name.to_string(), source })?;
        rec.state = WorkerState::Running;
        rec.pause_reason = None;
        tracing::info!(worker = name, "worker resumed");
        self.inner.metrics.incr_labeled("worker.resumes", &[("name", name)]);
        Ok(())
    }

    /// Thermal hook: pause every non-essential running worker, in
    /// registration order. Already-paused workers are skipped.
    pub fn pause_non_essential(&self) {
        let names: Vec<String> = {
            let workers = self.inner.workers.lock();
            workers
                .values()
                .filter(|r| !r.spec.essential && r.state == WorkerState::Running)
                .map(|r| r.spec.name.clone())
                .collect()
        };
        for name in names {
            if let Err(e) = self.pause_with(&name, PauseReason::Thermal) {
                tracing::error!(worker = %name, error = %e, "thermal pause failed");
            }
        }
    }

    /// Thermal hook: resume workers paused by the overheat path. Workers
    /// paused through the API stay paused.
    pub fn resume_thermally_paused(&self) {
        let names: Vec<String> = {
            let workers = self.inner.workers.lock();
            workers
                .values()
                .filter(|r| {
                    r.state == WorkerState::Paused
                        && r.pause_reason == Some(PauseReason::Thermal)
                })
                .map(|r| r.spec.name.clone())
                .collect()
        };
        for name in names {
            if let Err(e) = self.resume(&name) {
                tracing::error!(worker = %name, error = %e, "thermal resume failed");
            }
        }
    }

    /// Non-blocking liveness probe. A paused child still exists, so it
    /// counts as alive.
    pub fn is_alive(&self, name: &str) -> Result<bool, OrchestratorError> {
        let mut workers = self.inner.workers.lock();
        let rec = workers
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::UnknownWorker(name.to_string()))?;
        let Some(child) = rec.child.as_mut() else {
            return Ok(false);
        };
        match child.try_wait() {
            Ok(None) => Ok(true),
            Ok(Some(_)) | Err(_) => Ok(false),
        }
    }

    /// Stop every worker: SIGTERM to each process group, wait up to
    /// `grace`, then SIGKILL the stragglers. No live children remain on
    /// return. The watchdog is stopped first so nothing respawns mid-sweep.
    pub async fn stop_all(&self, grace: Duration) {
        self.stop_watchdog().await;

        let targets: Vec<(String, u32)> = {
            let mut workers = self.inner.workers.lock();
            let mut targets = Vec::new();
            for rec in workers.values_mut() {
                let (Some(pid), true) = (rec.pid, rec.child.is_some()) else {
                    continue;
                };
                if let Err(e) = signal_group(pid, Signal::SIGTERM) {
                    tracing::warn!(worker = %rec.spec.name, error = %e, "SIGTERM failed");
                }
                // A stopped process cannot act on SIGTERM until continued.
                if rec.state == WorkerState::Paused {
                    let _ = signal_group(pid, Signal::SIGCONT);
                }
                targets.push((rec.spec.name.clone(), pid));
            }
            targets
        };
        if targets.is_empty() {
            return;
        }
        tracing::info!(count = targets.len(), grace_s = grace.as_secs(), "stopping workers");

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let pending = self.reap_exited();
            if pending == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // Escalate whatever survived the grace period.
        let stragglers: Vec<(String, u32, Child)> = {
            let mut workers = self.inner.workers.lock();
            workers
                .values_mut()
                .filter_map(|rec| {
                    let pid = rec.pid?;
                    let child = rec.child.take()?;
                    rec.pid = None;
                    rec.state = WorkerState::Stopped;
                    rec.pause_reason = None;
                    Some((rec.spec.name.clone(), pid, child))
                })
                .collect()
        };
        for (name, pid, mut child) in stragglers {
            tracing::warn!(worker = %name, pid, "escalating to SIGKILL");
            let _ = signal_group(pid, Signal::SIGKILL);
            let _ = child.wait().await;
            self.inner.metrics.incr_labeled("worker.killed", &[("name", &name)]);
        }
        tracing::info!("all workers stopped");
    }

    /// Reap children that have exited; returns how many are still live.
    fn reap_exited(&self) -> usize {
        let mut workers = self.inner.workers.lock();
        let mut pending = 0;
        for rec in workers.values_mut() {
            let Some(child) = rec.child.as_mut() else {
                continue;
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    rec.last_exit_code = status.code();
                    rec.child = None;
                    rec.pid = None;
                    rec.state = WorkerState::Stopped;
                    rec.pause_reason = None;
                    tracing::debug!(worker = %rec.spec.name, ?status, "worker exited");
                }
                Ok(None) => pending += 1,
                Err(e) => {
                    tracing::warn!(worker = %rec.spec.name, error = %e, "reap probe failed");
                    pending += 1;
                }
            }
        }
        pending
    }

    /// Snapshot of every worker, in registration order.
    pub fn statuses(&self) -> Vec<WorkerStatus> {
        self.inner.workers.lock().values().map(|r| r.status()).collect()
    }

    /// Current state of one worker.
    pub fn worker_state(&self, name: &str) -> Option<WorkerState> {
        self.inner.workers.lock().get(name).map(|r| r.state)
    }

    /// Current pid of one worker, if it has a live child.
    pub fn worker_pid(&self, name: &str) -> Option<u32> {
        self.inner.workers.lock().get(name).and_then(|r| r.pid)
    }
}

/// Spawn a worker process: own process group, no controlling-terminal
/// stdio. The process group id equals the child pid.
pub(crate) fn spawn_child(argv: &[String]) -> std::io::Result<Child> {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .process_group(0)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd.spawn()
}

pub(crate) fn signal_group(pid: u32, signal: Signal) -> nix::Result<()> {
    killpg(Pid::from_raw(pid as i32), signal)
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
