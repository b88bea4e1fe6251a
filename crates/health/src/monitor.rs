// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic health monitor with hysteretic overheat detection.
//!
//! Every interval: take a sample, publish gauges, run the thermal latch,
//! and raise debounced resource-pressure warnings. The latch requires the
//! temperature to cross `temp_threshold` to fire and to drop below
//! `temp_threshold - hysteresis_margin` to recover, so a single borderline
//! sample cannot flap the fleet.

use crate::sample::{HealthSample, Sampler};
use parking_lot::Mutex;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vigil_core::{Clock, MetricsRegistry, SupervisorConfig, SystemClock};

/// Default recover margin below the overheat threshold, °C.
const DEFAULT_HYSTERESIS_MARGIN: f32 = 5.0;

/// Default minimum spacing between resource-pressure warnings.
const DEFAULT_WARN_DEBOUNCE: Duration = Duration::from_secs(60);

/// Callback invoked on thermal transitions.
pub type Callback = Box<dyn Fn() + Send + Sync>;

/// Capability record exposed by the orchestrator: pause non-essential
/// workers on overheat, resume them on recovery. Invocation only — the
/// monitor never owns the orchestrator.
pub struct ThermalHooks {
    pub on_overheat: Callback,
    pub on_recover: Callback,
}

impl ThermalHooks {
    /// Hooks that do nothing; for setups without an orchestrator.
    pub fn noop() -> Self {
        Self { on_overheat: Box::new(|| {}), on_recover: Box::new(|| {}) }
    }
}

/// Outbound event channel: `(kind, body)` handed to the telemetry client.
pub type TelemetrySink = Box<dyn Fn(&str, serde_json::Value) + Send + Sync>;

/// Monitor settings, lifted from the supervisor record.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub interval: Duration,
    pub temp_threshold: f32,
    pub cpu_threshold: f32,
    pub memory_threshold: f32,
    pub hysteresis_margin: f32,
    pub warn_debounce: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self::from_supervisor(&SupervisorConfig::default())
    }
}

impl HealthConfig {
    pub fn from_supervisor(config: &SupervisorConfig) -> Self {
        Self {
            interval: config.health_interval,
            temp_threshold: config.temp_threshold,
            cpu_threshold: config.cpu_threshold,
            memory_threshold: config.memory_threshold,
            hysteresis_margin: DEFAULT_HYSTERESIS_MARGIN,
            warn_debounce: DEFAULT_WARN_DEBOUNCE,
        }
    }
}

/// State shared between the monitor handle and its sampling task.
struct Shared {
    latest: Mutex<Option<HealthSample>>,
    overheating: AtomicBool,
}

/// Periodic vitals monitor. `start` spawns the sampling task; `stop` is
/// idempotent and waits for it to exit.
pub struct HealthMonitor<C: Clock = SystemClock> {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Consumed by `start`.
    ticker: Mutex<Option<MonitorTask<C>>>,
    interval: Duration,
}

impl<C: Clock> HealthMonitor<C> {
    pub fn with_clock(
        config: HealthConfig,
        sampler: Box<dyn Sampler>,
        hooks: ThermalHooks,
        sink: TelemetrySink,
        metrics: Arc<MetricsRegistry>,
        clock: C,
    ) -> Self {
        let shared = Arc::new(Shared {
            latest: Mutex::new(None),
            overheating: AtomicBool::new(false),
        });
        let interval = config.interval;
        let ticker = MonitorTask {
            config,
            sampler,
            hooks,
            sink,
            metrics,
            clock,
            shared: shared.clone(),
            last_pressure_warn: None,
            warned_no_thermal: false,
        };
        Self {
            shared,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            ticker: Mutex::new(Some(ticker)),
            interval,
        }
    }

    /// Spawn the sampling loop. Calling twice is a logged no-op.
    pub fn start(&self) {
        let Some(mut ticker) = self.ticker.lock().take() else {
            tracing::warn!("health monitor already started");
            return;
        };
        let cancel = self.cancel.clone();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => ticker.tick(),
                }
            }
            tracing::debug!("health monitor exited");
        });
        *self.task.lock() = Some(handle);
        tracing::info!("health monitor started");
    }

    /// Stop the sampling loop. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
            tracing::info!("health monitor stopped");
        }
    }

    /// Most recent successful sample, if any.
    pub fn latest_sample(&self) -> Option<HealthSample> {
        self.shared.latest.lock().clone()
    }

    /// Current state of the overheat latch.
    pub fn is_overheating(&self) -> bool {
        self.shared.overheating.load(Ordering::SeqCst)
    }
}

impl HealthMonitor<SystemClock> {
    pub fn new(
        config: HealthConfig,
        sampler: Box<dyn Sampler>,
        hooks: ThermalHooks,
        sink: TelemetrySink,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self::with_clock(config, sampler, hooks, sink, metrics, SystemClock)
    }
}

/// The sampling task's owned state; one `tick` per interval.
struct MonitorTask<C: Clock> {
    config: HealthConfig,
    sampler: Box<dyn Sampler>,
    hooks: ThermalHooks,
    sink: TelemetrySink,
    metrics: Arc<MetricsRegistry>,
    clock: C,
    shared: Arc<Shared>,
    last_pressure_warn: Option<Instant>,
    warned_no_thermal: bool,
}

impl<C: Clock> MonitorTask<C> {
    fn tick(&mut self) {
        let sample = match self.sampler.sample() {
            Ok(sample) => sample,
            Err(e) => {
                self.metrics.incr("health.sample_errors");
                tracing::warn!(error = %e, "vitals sample failed, skipping");
                return;
            }
        };

        self.metrics.set_gauge("host.cpu_pct", sample.cpu_pct as f64);
        self.metrics.set_gauge("host.mem_pct", sample.mem_pct as f64);
        self.metrics.set_gauge("host.disk_pct", sample.disk_pct as f64);
        if let Some(temp) = sample.temp_c {
            self.metrics.set_gauge("host.temp_c", temp as f64);
        }

        self.run_thermal_latch(&sample);
        self.check_resource_pressure(&sample);

        *self.shared.latest.lock() = Some(sample);
    }

    fn run_thermal_latch(&mut self, sample: &HealthSample) {
        let Some(temp) = sample.temp_c else {
            if !self.warned_no_thermal {
                self.warned_no_thermal = true;
                tracing::warn!("no thermal reading available; overheat protection inert");
            }
            return;
        };

        let overheating = self.shared.overheating.load(Ordering::SeqCst);
        if !overheating && temp >= self.config.temp_threshold {
            self.shared.overheating.store(true, Ordering::SeqCst);
            self.metrics.incr("health.overheat_events");
            tracing::warn!(temp_c = temp, threshold = self.config.temp_threshold, "overheat");
            invoke_hook("on_overheat", &self.hooks.on_overheat);
            (self.sink)(
                "overheat",
                json!({"temp_c": temp, "threshold": self.config.temp_threshold}),
            );
        } else if overheating && temp < self.config.temp_threshold - self.config.hysteresis_margin
        {
            self.shared.overheating.store(false, Ordering::SeqCst);
            self.metrics.incr("health.recover_events");
            tracing::info!(temp_c = temp, "thermal recovery");
            invoke_hook("on_recover", &self.hooks.on_recover);
            (self.sink)(
                "recover",
                json!({"temp_c": temp, "threshold": self.config.temp_threshold}),
            );
        }
    }

    fn check_resource_pressure(&mut self, sample: &HealthSample) {
        let pressured = sample.cpu_pct > self.config.cpu_threshold
            || sample.mem_pct > self.config.memory_threshold;
        if !pressured {
            return;
        }
        let now = self.clock.now();
        let debounced = self
            .last_pressure_warn
            .map_or(false, |at| now.duration_since(at) < self.config.warn_debounce);
        if debounced {
            return;
        }
        self.last_pressure_warn = Some(now);
        self.metrics.incr("health.resource_pressure");
        tracing::warn!(
            cpu_pct = sample.cpu_pct,
            mem_pct = sample.mem_pct,
            "resource pressure"
        );
        (self.sink)(
            "resource_pressure",
            json!({"cpu_pct": sample.cpu_pct, "mem_pct": sample.mem_pct}),
        );
    }
}

/// A hook must never kill the monitor; a panicking one is logged and dropped.
fn invoke_hook(name: &str, hook: &Callback) {
    if std::panic::catch_unwind(AssertUnwindSafe(hook)).is_err() {
        tracing::error!(hook = name, "thermal hook panicked");
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
