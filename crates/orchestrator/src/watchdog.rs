// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watchdog: periodic liveness probing and respawn with a restart ceiling.
//!
//! Each tick makes two passes: probe running workers for exits, then
//! respawn crashed ones. A worker that crashes `max_restarts + 1` times
//! without a stable run in between reaches `GaveUp` and is left alone.
//! Paused workers are skipped — a stopped child still exists.

use crate::orchestrator::{spawn_child, Orchestrator};
use crate::worker::WorkerState;
use serde_json::json;
use vigil_core::Clock;

/// Outcome of the locked respawn decision; acted on outside the lock.
enum Decision {
    GaveUp { restarts: u32, last_exit_code: Option<i32> },
    Respawn { argv: Vec<String>, attempt: u32 },
}

impl<C: Clock> Orchestrator<C> {
    /// Spawn the watchdog task. Calling twice is a logged no-op.
    pub fn start_watchdog(&self) {
        let mut slot = self.inner.watchdog.lock();
        if slot.is_some() {
            tracing::warn!("watchdog already running");
            return;
        }
        let orchestrator = self.clone();
        let cancel = self.inner.cancel.clone();
        let interval = self.inner.config.watchdog_interval;
        *slot = Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Workers were just started; skip the immediate first tick.
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => orchestrator.tick(),
                }
            }
            tracing::debug!("watchdog exited");
        }));
        tracing::info!(interval_s = interval.as_secs(), "watchdog started");
    }

    /// Stop the watchdog task and wait for it. Idempotent.
    pub async fn stop_watchdog(&self) {
        self.inner.cancel.cancel();
        let handle = self.inner.watchdog.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
            tracing::info!("watchdog stopped");
        }
    }

    /// One watchdog pass over every worker.
    pub(crate) fn tick(&self) {
        let names: Vec<String> = self.inner.workers.lock().keys().cloned().collect();
        for name in &names {
            self.probe(name);
        }
        for name in &names {
            self.restart_if_crashed(name);
        }
    }

    /// Detect an exited child; reset the restart counter after a stable run.
    fn probe(&self, name: &str) {
        let mut workers = self.inner.workers.lock();
        let Some(rec) = workers.get_mut(name) else {
            return;
        };
        if rec.state != WorkerState::Running || rec.starting {
            return;
        }
        let Some(child) = rec.child.as_mut() else {
            tracing::error!(worker = name, "running worker lost its child handle");
            rec.state = WorkerState::Crashed;
            return;
        };
        match child.try_wait() {
            Ok(None) => {
                let stable = rec.last_start.is_some_and(|at| {
                    self.inner.clock.now().duration_since(at)
                        >= self.inner.config.stability_window
                });
                if rec.restart_count > 0 && stable {
                    tracing::debug!(worker = name, "restart counter reset after stable run");
                    rec.restart_count = 0;
                }
            }
            Ok(Some(status)) => {
                let exit_code = status.code();
                rec.child = None;
                rec.pid = None;
                rec.last_exit_code = exit_code;
                rec.state = WorkerState::Crashed;
                let code_label =
                    exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                self.inner.metrics.incr_labeled(
                    "worker.exits",
                    &[("name", name), ("exit_code", &code_label)],
                );
                tracing::warn!(worker = name, ?status, "worker exited");
            }
            Err(e) => {
                // Probe errors never kill the watchdog loop.
                tracing::error!(worker = name, error = %e, "liveness probe failed");
            }
        }
    }

    /// Respawn a crashed worker, or latch `GaveUp` at the ceiling.
    fn restart_if_crashed(&self, name: &str) {
        let decision = {
            let mut workers = self.inner.workers.lock();
            let Some(rec) = workers.get_mut(name) else {
                return;
            };
            if rec.state != WorkerState::Crashed || rec.starting {
                return;
            }
            if rec.restart_count >= self.inner.config.max_restarts {
                rec.state = WorkerState::GaveUp;
                self.inner.metrics.incr_labeled("worker.gave_up", &[("name", name)]);
                Decision::GaveUp {
                    restarts: rec.restart_count,
                    last_exit_code: rec.last_exit_code,
                }
            } else {
                rec.restart_count += 1;
                rec.starting = true;
                Decision::Respawn { argv: rec.argv.clone(), attempt: rec.restart_count }
            }
        };

        match decision {
            Decision::GaveUp { restarts, last_exit_code } => {
                tracing::error!(worker = name, restarts, "restart ceiling reached, giving up");
                (self.inner.sink)(
                    "worker_gave_up",
                    json!({
                        "worker": name,
                        "restart_count": restarts,
                        "last_exit_code": last_exit_code,
                    }),
                );
            }
            Decision::Respawn { argv, attempt } => {
                let spawned = spawn_child(&argv);
                let mut workers = self.inner.workers.lock();
                let Some(rec) = workers.get_mut(name) else {
                    return;
                };
                rec.starting = false;
                match spawned {
                    Ok(child) => {
                        rec.pid = child.id();
                        rec.child = Some(child);
                        rec.state = WorkerState::Running;
                        rec.last_start = Some(self.inner.clock.now());
                        self.inner.metrics.incr_labeled("worker.restarts", &[("name", name)]);
                        tracing::info!(worker = name, attempt, pid = ?rec.pid, "worker respawned");
                    }
                    Err(e) => {
                        // Counts against the budget; retried next tick.
                        tracing::error!(worker = name, attempt, error = %e, "respawn failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "watchdog_tests.rs"]
mod tests;
