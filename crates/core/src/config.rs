// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor configuration record.
//!
//! Every component receives its settings from this record at construction;
//! nothing reads the environment after startup. The daemon crate populates it
//! from `VIGIL_*` variables and treats any parse failure as fatal.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors. Fatal at startup (exit code 1).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("invalid worker entry {entry:?}: {reason}")]
    InvalidWorkerSpec { entry: String, reason: String },
}

/// A worker declaration: `name:command:essential`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEntry {
    pub name: String,
    pub command: String,
    /// Essential workers are never paused under thermal pressure.
    pub essential: bool,
}

/// The full configuration record consumed by the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Label stamped on every telemetry payload
    pub device_id: String,
    /// Minimum severity emitted by the tracing subscriber
    pub log_level: String,
    /// POST target for telemetry payloads
    pub telemetry_endpoint: String,
    /// Persistent queue drain cadence
    pub flush_interval: Duration,
    /// Cadence of `heartbeat` telemetry events
    pub heartbeat_interval: Duration,
    /// Consecutive failures before the breaker opens
    pub circuit_failure_threshold: u32,
    /// Open → HalfOpen delay
    pub circuit_timeout: Duration,
    /// Attempts per send
    pub retry_max_attempts: u32,
    /// Backoff base delay
    pub retry_initial_delay: Duration,
    /// Vitals sampler cadence
    pub health_interval: Duration,
    /// Overheat trigger, °C
    pub temp_threshold: f32,
    /// CPU warning trigger, percent
    pub cpu_threshold: f32,
    /// Memory warning trigger, percent
    pub memory_threshold: f32,
    /// Liveness poll cadence
    pub watchdog_interval: Duration,
    /// Per-worker restart ceiling
    pub max_restarts: u32,
    /// How long stop_all waits before escalating SIGTERM to SIGKILL
    pub grace_period: Duration,
    /// Continuous uptime after which a worker's restart counter resets
    pub restart_stability_window: Duration,
    /// Workers to register at startup
    pub workers: Vec<WorkerEntry>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            device_id: "edge-001".to_string(),
            log_level: "INFO".to_string(),
            telemetry_endpoint: "https://localhost/telemetry".to_string(),
            flush_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(60),
            circuit_failure_threshold: 3,
            circuit_timeout: Duration::from_secs(60),
            retry_max_attempts: 3,
            retry_initial_delay: Duration::from_secs(2),
            health_interval: Duration::from_secs(10),
            temp_threshold: 75.0,
            cpu_threshold: 95.0,
            memory_threshold: 90.0,
            watchdog_interval: Duration::from_secs(5),
            max_restarts: 10,
            grace_period: Duration::from_secs(10),
            restart_stability_window: Duration::from_secs(60),
            workers: vec![demo_worker()],
        }
    }
}

/// Placeholder worker registered when no `workers` value is configured.
pub fn demo_worker() -> WorkerEntry {
    WorkerEntry {
        name: "demo-sensor".to_string(),
        command: "sleep 3600".to_string(),
        essential: false,
    }
}

/// Parse a duration string like "500ms", "30s", "5m", "1h" into a Duration
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the numeric prefix
    let (num_str, suffix) = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| (&s[..i], &s[i..]))
        .unwrap_or((s, ""));

    let num: u64 = num_str.parse().map_err(|_| format!("invalid number in duration: {}", s))?;

    let multiplier = match suffix.trim() {
        "ms" | "millis" | "millisecond" | "milliseconds" => {
            return Ok(Duration::from_millis(num));
        }
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
        "d" | "day" | "days" => 86400,
        other => return Err(format!("unknown duration suffix: {}", other)),
    };

    Ok(Duration::from_secs(num * multiplier))
}

/// Parse the `workers` grammar: comma-separated `name:command:essential`.
///
/// Commands may contain colons (e.g. paths with drive-style prefixes or URLs
/// in arguments), so the name is taken up to the first colon and the flag
/// after the last one.
pub fn parse_workers(spec: &str) -> Result<Vec<WorkerEntry>, ConfigError> {
    let mut entries = Vec::new();
    for raw in spec.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (name, rest) = raw.split_once(':').ok_or_else(|| ConfigError::InvalidWorkerSpec {
            entry: raw.to_string(),
            reason: "expected name:command:essential".to_string(),
        })?;
        let (command, flag) =
            rest.rsplit_once(':').ok_or_else(|| ConfigError::InvalidWorkerSpec {
                entry: raw.to_string(),
                reason: "expected name:command:essential".to_string(),
            })?;
        let name = name.trim();
        let command = command.trim();
        if name.is_empty() || command.is_empty() {
            return Err(ConfigError::InvalidWorkerSpec {
                entry: raw.to_string(),
                reason: "name and command must be non-empty".to_string(),
            });
        }
        let essential = match flag.trim() {
            "true" => true,
            "false" => false,
            other => {
                return Err(ConfigError::InvalidWorkerSpec {
                    entry: raw.to_string(),
                    reason: format!("essential flag must be true or false, got {:?}", other),
                })
            }
        };
        if entries.iter().any(|e: &WorkerEntry| e.name == name) {
            return Err(ConfigError::InvalidWorkerSpec {
                entry: raw.to_string(),
                reason: format!("duplicate worker name {:?}", name),
            });
        }
        entries.push(WorkerEntry {
            name: name.to_string(),
            command: command.to_string(),
            essential,
        });
    }
    Ok(entries)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
