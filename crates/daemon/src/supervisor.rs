// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor: owns every component and runs the daemon lifecycle.
//!
//! Startup wires metrics → telemetry → orchestrator → health monitor, then
//! brings them up in that order. Shutdown runs strictly in reverse: stop
//! workers (grace, then escalation), stop the monitor, final telemetry
//! flush, stop the client, emit the metrics snapshot.

use fs2::FileExt;
use serde_json::json;
use std::fs::File;
use std::io::Write;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use vigil_core::{MetricsRegistry, SupervisorConfig, TelemetryPayload};
use vigil_health::{HealthConfig, HealthMonitor, SysinfoSampler, ThermalHooks};
use vigil_orchestrator::{EventSink, Orchestrator, OrchestratorConfig, OrchestratorError};
use vigil_storage::{PersistentQueue, QueueError};
use vigil_telemetry::{HttpSender, SendFailed, TelemetryClient, TelemetryConfig};

/// Socket timeout for telemetry POSTs.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that abort startup (exit code 2).
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to lock state dir: another vigild running? ({0})")]
    LockFailed(#[source] std::io::Error),

    #[error("persistent queue: {0}")]
    Queue(#[from] QueueError),

    #[error("telemetry endpoint: {0}")]
    Http(#[from] SendFailed),

    #[error("worker registration: {0}")]
    Worker(#[from] OrchestratorError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The assembled daemon.
pub struct Supervisor {
    config: SupervisorConfig,
    metrics: Arc<MetricsRegistry>,
    telemetry: TelemetryClient<HttpSender>,
    health: HealthMonitor,
    orchestrator: Orchestrator,
    started_at: Instant,
    // NOTE(lifetime): held to keep the exclusive pid-file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
}

impl Supervisor {
    /// Build every component against `state_dir` without starting anything.
    pub async fn build(
        config: SupervisorConfig,
        state_dir: &Path,
    ) -> Result<Supervisor, StartupError> {
        ensure_state_dir(state_dir)?;
        let lock_file = acquire_pid_lock(state_dir)?;

        let metrics = Arc::new(MetricsRegistry::new());
        let queue = PersistentQueue::open(state_dir.join("telemetry.queue"))?;
        let sender = HttpSender::new(&config.telemetry_endpoint, REQUEST_TIMEOUT)?;
        let telemetry = TelemetryClient::new(
            TelemetryConfig::from_supervisor(&config),
            queue,
            metrics.clone(),
            sender,
        );

        let orchestrator = Orchestrator::new(
            OrchestratorConfig::from_supervisor(&config),
            metrics.clone(),
            event_sink(&telemetry, &config.device_id),
        );
        for entry in &config.workers {
            orchestrator.register(entry.clone())?;
        }

        let hooks = ThermalHooks {
            on_overheat: {
                let orchestrator = orchestrator.clone();
                Box::new(move || orchestrator.pause_non_essential())
            },
            on_recover: {
                let orchestrator = orchestrator.clone();
                Box::new(move || orchestrator.resume_thermally_paused())
            },
        };
        let health = HealthMonitor::new(
            HealthConfig::from_supervisor(&config),
            Box::new(SysinfoSampler::new()),
            hooks,
            event_sink(&telemetry, &config.device_id),
            metrics.clone(),
        );

        Ok(Supervisor {
            config,
            metrics,
            telemetry,
            health,
            orchestrator,
            started_at: Instant::now(),
            lock_file,
        })
    }

    /// Bring everything up, then wait for a shutdown trigger: SIGTERM,
    /// SIGINT, or a fatal queue failure. Runs the full shutdown sequence
    /// before returning.
    pub async fn run(self) -> Result<(), StartupError> {
        tracing::info!(
            device_id = %self.config.device_id,
            workers = self.config.workers.len(),
            "vigil supervisor starting"
        );
        self.telemetry.start();
        self.orchestrator.start_all();
        self.orchestrator.start_watchdog();
        self.health.start();
        self.telemetry.send(TelemetryPayload::event(
            "supervisor_started",
            &self.config.device_id,
            json!({
                "workers": self.config.workers.iter().map(|w| w.name.clone()).collect::<Vec<_>>(),
            }),
        ));

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let fatal = self.telemetry.fatal_token();
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM");
                    break;
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT");
                    break;
                }
                _ = fatal.cancelled() => {
                    tracing::error!("telemetry queue failure; initiating shutdown");
                    break;
                }
                _ = heartbeat.tick() => self.send_heartbeat(),
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn send_heartbeat(&self) {
        let workers = self.orchestrator.statuses();
        self.telemetry.send(TelemetryPayload::event(
            "heartbeat",
            &self.config.device_id,
            json!({
                "uptime_s": self.started_at.elapsed().as_secs(),
                "queue_depth": self.telemetry.queue_depth(),
                "overheating": self.health.is_overheating(),
                "workers": workers,
            }),
        ));
        self.metrics.incr("supervisor.heartbeats");
    }

    /// Reverse-order teardown. Completes within the grace budget plus one
    /// final flush.
    async fn shutdown(&self) {
        tracing::info!("shutting down");
        self.orchestrator.stop_all(self.config.grace_period).await;
        self.health.stop().await;
        let attempted = self.telemetry.flush().await;
        tracing::info!(attempted, "final telemetry flush");
        self.telemetry.stop().await;

        let snapshot = self.metrics.snapshot();
        match serde_json::to_string(&snapshot) {
            Ok(rendered) => tracing::info!(metrics = %rendered, "final metrics snapshot"),
            Err(e) => tracing::warn!(error = %e, "failed to render metrics snapshot"),
        }
        tracing::info!("shutdown complete");
    }
}

/// Adapter from component events to telemetry payloads.
fn event_sink(telemetry: &TelemetryClient<HttpSender>, device_id: &str) -> EventSink {
    let telemetry = telemetry.clone();
    let device_id = device_id.to_string();
    Box::new(move |kind, body| {
        telemetry.send(TelemetryPayload::event(kind, device_id.clone(), body));
    })
}

/// Create the state directory mode 0750 if missing.
fn ensure_state_dir(state_dir: &Path) -> Result<(), StartupError> {
    if !state_dir.exists() {
        std::fs::DirBuilder::new().recursive(true).mode(0o750).create(state_dir)?;
    }
    Ok(())
}

/// Take the exclusive pid-file lock; refuses to run two daemons over the
/// same state directory.
fn acquire_pid_lock(state_dir: &Path) -> Result<File, StartupError> {
    let path = state_dir.join("vigild.pid");
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)?;
    file.try_lock_exclusive().map_err(StartupError::LockFailed)?;
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(file)
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
