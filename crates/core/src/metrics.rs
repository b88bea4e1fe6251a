// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide metrics registry: labelled counters, gauges, and timers.
//!
//! The registry is shared by `Arc` across every component; a snapshot is
//! emitted on shutdown and attached to heartbeat events. Updates take a
//! single short-lived lock, which keeps each counter bump atomic.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// A metric name plus its sorted label set, rendered as
/// `name{key=value,...}` (or the bare name when unlabelled).
fn render_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<_> = labels.to_vec();
    sorted.sort();
    let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}{{{}}}", name, rendered.join(","))
}

/// Aggregate for an observed duration series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimerStats {
    pub count: u64,
    pub total_ms: u64,
    pub max_ms: u64,
}

#[derive(Default)]
struct Inner {
    counters: BTreeMap<String, u64>,
    gauges: BTreeMap<String, f64>,
    timers: BTreeMap<String, TimerStats>,
}

/// Registry of process-wide metrics.
#[derive(Default)]
pub struct MetricsRegistry {
    inner: Mutex<Inner>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment an unlabelled counter by one.
    pub fn incr(&self, name: &str) {
        self.incr_by(name, &[], 1);
    }

    /// Increment a labelled counter by one.
    pub fn incr_labeled(&self, name: &str, labels: &[(&str, &str)]) {
        self.incr_by(name, labels, 1);
    }

    pub fn incr_by(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let key = render_key(name, labels);
        *self.inner.lock().counters.entry(key).or_insert(0) += n;
    }

    /// Set an unlabelled gauge.
    pub fn set_gauge(&self, name: &str, value: f64) {
        self.inner.lock().gauges.insert(name.to_string(), value);
    }

    /// Record an observed duration under a timer metric.
    pub fn observe(&self, name: &str, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        let mut inner = self.inner.lock();
        let stats = inner.timers.entry(name.to_string()).or_default();
        stats.count += 1;
        stats.total_ms += ms;
        stats.max_ms = stats.max_ms.max(ms);
    }

    /// Current value of a counter, zero if never incremented.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = render_key(name, labels);
        self.inner.lock().counters.get(&key).copied().unwrap_or(0)
    }

    /// Current value of a gauge, if ever set.
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.inner.lock().gauges.get(name).copied()
    }

    /// Point-in-time copy of every metric.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        MetricsSnapshot {
            counters: inner.counters.clone(),
            gauges: inner.gauges.clone(),
            timers: inner.timers.clone(),
        }
    }
}

/// Serializable copy of the registry, emitted on shutdown.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub timers: BTreeMap<String, TimerStats>,
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
