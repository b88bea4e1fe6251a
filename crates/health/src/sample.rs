// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host vitals snapshot and the sampler seam.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One snapshot of host vitals.
///
/// `temp_c` is `None` on hardware without an exposed thermal zone; the
/// overheat predicate treats absence as unknown and never fires on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub cpu_pct: f32,
    pub mem_pct: f32,
    pub disk_pct: f32,
    pub temp_c: Option<f32>,
    pub timestamp: DateTime<Utc>,
}

impl HealthSample {
    pub fn now(cpu_pct: f32, mem_pct: f32, disk_pct: f32, temp_c: Option<f32>) -> Self {
        Self { cpu_pct, mem_pct, disk_pct, temp_c, timestamp: Utc::now() }
    }
}

/// A failed vitals read. Logged, counted, and skipped by the monitor.
#[derive(Debug, Error)]
#[error("sample failed: {0}")]
pub struct SampleError(pub String);

/// Source of vitals snapshots. The monitor owns its sampler mutably so
/// implementations can keep the state CPU accounting needs between reads.
pub trait Sampler: Send + 'static {
    fn sample(&mut self) -> Result<HealthSample, SampleError>;
}
