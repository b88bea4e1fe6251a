// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker records tracked by the orchestrator.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::process::Child;
use vigil_core::WorkerEntry;

/// Liveness state of a supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Registered but never started
    Idle,
    Running,
    /// Stopped via SIGSTOP; the process still exists
    Paused,
    /// Child exited; eligible for watchdog respawn
    Crashed,
    /// Stopped deliberately
    Stopped,
    /// Restart ceiling reached; never respawned automatically
    GaveUp,
}

/// Why a worker is paused. Thermal pauses are released on recovery;
/// API pauses are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    Api,
    Thermal,
}

/// Internal per-worker record. Owned exclusively by the orchestrator's
/// registry; the child handle lives and dies here.
pub(crate) struct WorkerRecord {
    pub spec: WorkerEntry,
    /// Command parsed to argv once at registration
    pub argv: Vec<String>,
    pub state: WorkerState,
    pub child: Option<Child>,
    /// Child pid; also its process-group id (spawned with `process_group(0)`)
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub last_start: Option<Instant>,
    pub last_exit_code: Option<i32>,
    pub pause_reason: Option<PauseReason>,
    /// Reserved by a start call that is spawning outside the lock
    pub starting: bool,
}

impl WorkerRecord {
    pub fn new(spec: WorkerEntry, argv: Vec<String>) -> Self {
        Self {
            spec,
            argv,
            state: WorkerState::Idle,
            child: None,
            pid: None,
            restart_count: 0,
            last_start: None,
            last_exit_code: None,
            pause_reason: None,
            starting: false,
        }
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            name: self.spec.name.clone(),
            essential: self.spec.essential,
            state: self.state,
            pid: self.pid,
            restart_count: self.restart_count,
            last_exit_code: self.last_exit_code,
        }
    }
}

/// Public snapshot of one worker, used for heartbeats and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub name: String,
    pub essential: bool,
    pub state: WorkerState,
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
}
