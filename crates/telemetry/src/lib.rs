// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! vigil-telemetry: resilient outbound telemetry channel
//!
//! Combines retry with exponential backoff, a circuit breaker, and the
//! durable store-and-forward queue from vigil-storage.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod breaker;
pub mod client;
pub mod retry;
pub mod sender;

pub use breaker::{CircuitBreaker, CircuitOpen, CircuitState};
pub use client::{TelemetryClient, TelemetryConfig};
pub use retry::RetryPolicy;
pub use sender::{HttpSender, SendFailed, Sender};
