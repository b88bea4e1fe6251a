// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon.
//!
//! Everything is read once at startup into the configuration record; no
//! component consults the environment afterwards. Any unparseable value is
//! fatal (exit code 1).

use std::path::PathBuf;
use std::time::Duration;
use vigil_core::{demo_worker, parse_duration, parse_workers, ConfigError, SupervisorConfig};

/// Resolve the state directory: `VIGIL_STATE_DIR` > `/var/lib/vigild`.
pub fn state_dir() -> PathBuf {
    match std::env::var("VIGIL_STATE_DIR") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from("/var/lib/vigild"),
    }
}

/// Load the configuration record from `VIGIL_*` environment variables.
pub fn load_config() -> Result<SupervisorConfig, ConfigError> {
    load_config_from(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
}

/// Load configuration through an explicit lookup, for tests.
pub fn load_config_from(
    get: impl Fn(&str) -> Option<String>,
) -> Result<SupervisorConfig, ConfigError> {
    let mut config = SupervisorConfig::default();

    if let Some(v) = get("VIGIL_DEVICE_ID") {
        config.device_id = v;
    }
    if let Some(v) = get("VIGIL_LOG_LEVEL") {
        config.log_level = v;
    }
    if let Some(v) = get("VIGIL_TELEMETRY_ENDPOINT") {
        config.telemetry_endpoint = v;
    }

    duration(&get, "VIGIL_FLUSH_INTERVAL", &mut config.flush_interval)?;
    duration(&get, "VIGIL_HEARTBEAT_INTERVAL", &mut config.heartbeat_interval)?;
    duration(&get, "VIGIL_CIRCUIT_TIMEOUT", &mut config.circuit_timeout)?;
    duration(&get, "VIGIL_RETRY_INITIAL_DELAY", &mut config.retry_initial_delay)?;
    duration(&get, "VIGIL_HEALTH_INTERVAL", &mut config.health_interval)?;
    duration(&get, "VIGIL_WATCHDOG_INTERVAL", &mut config.watchdog_interval)?;
    duration(&get, "VIGIL_GRACE_PERIOD", &mut config.grace_period)?;
    duration(&get, "VIGIL_RESTART_STABILITY_WINDOW", &mut config.restart_stability_window)?;

    number(&get, "VIGIL_CIRCUIT_FAILURE_THRESHOLD", &mut config.circuit_failure_threshold)?;
    number(&get, "VIGIL_RETRY_MAX_ATTEMPTS", &mut config.retry_max_attempts)?;
    number(&get, "VIGIL_MAX_RESTARTS", &mut config.max_restarts)?;

    percent(&get, "VIGIL_TEMP_THRESHOLD", &mut config.temp_threshold)?;
    percent(&get, "VIGIL_CPU_THRESHOLD", &mut config.cpu_threshold)?;
    percent(&get, "VIGIL_MEMORY_THRESHOLD", &mut config.memory_threshold)?;

    if let Some(spec) = get("VIGIL_WORKERS") {
        let workers = parse_workers(&spec)?;
        config.workers = if workers.is_empty() { vec![demo_worker()] } else { workers };
    }

    Ok(config)
}

fn duration(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut Duration,
) -> Result<(), ConfigError> {
    if let Some(v) = get(key) {
        *slot = parse_duration(&v)
            .map_err(|reason| ConfigError::InvalidValue { key: key.to_string(), reason })?;
    }
    Ok(())
}

fn number(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut u32,
) -> Result<(), ConfigError> {
    if let Some(v) = get(key) {
        *slot = v.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("not a whole number: {:?}", v),
        })?;
    }
    Ok(())
}

fn percent(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut f32,
) -> Result<(), ConfigError> {
    if let Some(v) = get(key) {
        *slot = v.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("not a number: {:?}", v),
        })?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
