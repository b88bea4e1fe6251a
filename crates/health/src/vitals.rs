// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! sysinfo-backed vitals sampler.

use crate::sample::{HealthSample, SampleError, Sampler};
use sysinfo::{Components, Disks, System};

/// Samples CPU, memory, root-disk, and thermal-zone readings from the host.
///
/// The `System` handle is kept across samples: CPU usage is computed from
/// the delta between consecutive refreshes, so the first reading after
/// startup reports 0%.
pub struct SysinfoSampler {
    system: System,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self { system }
    }

    fn disk_pct() -> f32 {
        let disks = Disks::new_with_refreshed_list();
        // Prefer the root mount; otherwise the largest disk.
        let disk = disks
            .iter()
            .find(|d| d.mount_point() == std::path::Path::new("/"))
            .or_else(|| disks.iter().max_by_key(|d| d.total_space()));
        match disk {
            Some(d) if d.total_space() > 0 => {
                let used = d.total_space().saturating_sub(d.available_space());
                (used as f32 / d.total_space() as f32) * 100.0
            }
            _ => 0.0,
        }
    }

    fn temp_c() -> Option<f32> {
        let components = Components::new_with_refreshed_list();
        // Hottest zone drives the overheat decision.
        components
            .iter()
            .filter_map(|c| c.temperature())
            .max_by(|a, b| a.total_cmp(b))
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SysinfoSampler {
    fn sample(&mut self) -> Result<HealthSample, SampleError> {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let cpu_pct = self.system.global_cpu_usage();
        let total = self.system.total_memory();
        let mem_pct = if total == 0 {
            0.0
        } else {
            (self.system.used_memory() as f32 / total as f32) * 100.0
        };

        Ok(HealthSample::now(cpu_pct, mem_pct, Self::disk_pct(), Self::temp_c()))
    }
}
