// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! vigil-orchestrator: lifecycle supervisor for child worker processes

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod orchestrator;
pub mod watchdog;
pub mod worker;

pub use orchestrator::{EventSink, Orchestrator, OrchestratorConfig, OrchestratorError};
pub use worker::{PauseReason, WorkerState, WorkerStatus};
