// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! vigil-health: host vitals sampling and hysteretic overheat detection

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod monitor;
pub mod sample;
pub mod vitals;

pub use monitor::{HealthConfig, HealthMonitor, TelemetrySink, ThermalHooks};
pub use sample::{HealthSample, SampleError, Sampler};
pub use vitals::SysinfoSampler;
