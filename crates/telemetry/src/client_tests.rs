// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::sender::SendFailed;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use vigil_core::FakeClock;

/// Sender whose health is flipped by tests; records delivered ids in order.
#[derive(Clone, Default)]
struct ScriptedSender {
    state: Arc<SenderState>,
}

#[derive(Default)]
struct SenderState {
    healthy: AtomicBool,
    delivered: Mutex<Vec<String>>,
}

impl ScriptedSender {
    fn healthy() -> Self {
        let sender = Self::default();
        sender.set_healthy(true);
        sender
    }

    fn unhealthy() -> Self {
        Self::default()
    }

    fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    fn delivered(&self) -> Vec<String> {
        self.state.delivered.lock().clone()
    }
}

#[async_trait]
impl Sender for ScriptedSender {
    async fn post(&self, payload: &TelemetryPayload) -> Result<(), SendFailed> {
        if self.state.healthy.load(Ordering::SeqCst) {
            self.state.delivered.lock().push(payload.id.clone());
            Ok(())
        } else {
            Err(SendFailed("connection refused".to_string()))
        }
    }
}

fn test_config() -> TelemetryConfig {
    TelemetryConfig {
        // Flush is driven manually in tests
        flush_interval: Duration::from_secs(3600),
        circuit_failure_threshold: 3,
        circuit_timeout: Duration::from_secs(60),
        retry_max_attempts: 1,
        retry_initial_delay: Duration::from_millis(1),
        channel_capacity: 8,
        batch_size: 50,
    }
}

struct Harness {
    client: TelemetryClient<ScriptedSender, FakeClock>,
    sender: ScriptedSender,
    clock: FakeClock,
    metrics: Arc<MetricsRegistry>,
    _dir: TempDir,
}

fn harness(config: TelemetryConfig, sender: ScriptedSender) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let queue = PersistentQueue::open(dir.path().join("telemetry.queue")).unwrap();
    let metrics = Arc::new(MetricsRegistry::new());
    let clock = FakeClock::new();
    let client = TelemetryClient::with_clock(
        config,
        queue,
        metrics.clone(),
        sender.clone(),
        clock.clone(),
    );
    Harness { client, sender, clock, metrics, _dir: dir }
}

fn payload(kind: &str) -> TelemetryPayload {
    TelemetryPayload::event(kind, "edge-test", json!({}))
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within deadline");
}

#[tokio::test]
async fn healthy_send_is_delivered_not_queued() {
    let h = harness(test_config(), ScriptedSender::healthy());
    h.client.start();

    h.client.send(payload("heartbeat"));

    let sender = h.sender.clone();
    eventually(move || sender.delivered().len() == 1).await;
    assert_eq!(h.metrics.counter("telemetry.sent", &[]), 1);
    assert_eq!(h.client.queue_depth(), 0);
    h.client.stop().await;
}

#[tokio::test]
async fn outage_spills_all_payloads_then_flush_drains_fifo() {
    let h = harness(test_config(), ScriptedSender::unhealthy());
    h.client.start();

    let payloads: Vec<_> = (0..5).map(|_| payload("reading")).collect();
    let expected_ids: Vec<_> = payloads.iter().map(|p| p.id.clone()).collect();
    for p in payloads {
        h.client.send(p);
    }

    // Three failed deliveries trip the breaker; the last two are refused.
    // Either way all five must land in the queue, in enqueue order.
    let client = h.client.clone();
    eventually(move || client.queue_depth() == 5).await;
    assert_eq!(h.metrics.counter("telemetry.spilled", &[]), 5);

    // Endpoint recovers, but the breaker is still open: flush is a no-op.
    h.sender.set_healthy(true);
    assert_eq!(h.client.flush().await, 0);

    // After the open timeout the probe succeeds and the batch drains.
    h.clock.advance(Duration::from_secs(60));
    assert_eq!(h.client.flush().await, 5);
    assert_eq!(h.client.queue_depth(), 0);
    assert_eq!(h.sender.delivered(), expected_ids);
    h.client.stop().await;
}

#[tokio::test]
async fn channel_backpressure_spills_directly() {
    let config = TelemetryConfig { channel_capacity: 1, ..test_config() };
    let h = harness(config, ScriptedSender::healthy());
    // Worker not started: the channel fills and overflow goes to disk.

    h.client.send(payload("a"));
    h.client.send(payload("b"));
    h.client.send(payload("c"));

    assert_eq!(h.client.queue_depth(), 2);
    assert_eq!(h.metrics.counter("telemetry.spilled", &[]), 2);
}

#[tokio::test]
async fn stop_flushes_buffered_and_queued_payloads() {
    let h = harness(test_config(), ScriptedSender::healthy());
    // Never started: payloads sit in the channel until stop() drains them.
    h.client.send(payload("a"));
    h.client.send(payload("b"));

    h.client.stop().await;

    assert_eq!(h.sender.delivered().len(), 2);
    assert_eq!(h.client.queue_depth(), 0);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let h = harness(test_config(), ScriptedSender::healthy());
    h.client.start();
    h.client.stop().await;
    h.client.stop().await;
}

#[tokio::test]
async fn failing_head_entry_blocks_the_batch() {
    // High threshold keeps the breaker closed throughout.
    let config = TelemetryConfig { circuit_failure_threshold: 100, ..test_config() };
    let h = harness(config, ScriptedSender::unhealthy());

    h.client.send(payload("head"));
    h.client.send(payload("tail"));
    h.client.stop().await; // spills both, final flush fails on the head

    assert_eq!(h.client.queue_depth(), 2);

    // Head failed once more than tail was attempted (tail never tried).
    assert_eq!(h.client.flush().await, 1);
    assert_eq!(h.client.queue_depth(), 2);

    h.sender.set_healthy(true);
    assert_eq!(h.client.flush().await, 2);
    assert_eq!(h.client.queue_depth(), 0);
    let delivered = h.sender.delivered();
    assert_eq!(delivered.len(), 2);
}

#[tokio::test]
async fn half_open_probe_failure_refuses_next_flush() {
    let config = TelemetryConfig { circuit_failure_threshold: 1, ..test_config() };
    let h = harness(config, ScriptedSender::unhealthy());

    h.client.send(payload("x"));
    h.client.stop().await; // breaker trips on the buffered payload

    h.clock.advance(Duration::from_secs(60));
    // Probe admitted, fails, breaker reopens with a fresh stamp.
    assert_eq!(h.client.flush().await, 1);
    // Immediately after: refused without an attempt.
    assert_eq!(h.client.flush().await, 0);

    // Recovery path still works after the next timeout.
    h.sender.set_healthy(true);
    h.clock.advance(Duration::from_secs(60));
    assert_eq!(h.client.flush().await, 1);
    assert_eq!(h.client.queue_depth(), 0);
}

#[tokio::test]
async fn retries_before_spilling() {
    let config = TelemetryConfig {
        retry_max_attempts: 3,
        circuit_failure_threshold: 100,
        ..test_config()
    };
    // Fails twice then succeeds, within a single send's retry budget.
    #[derive(Clone)]
    struct FlakySender {
        countdown: Arc<Mutex<u32>>,
        delivered: Arc<Mutex<Vec<String>>>,
    }
    #[async_trait]
    impl Sender for FlakySender {
        async fn post(&self, payload: &TelemetryPayload) -> Result<(), SendFailed> {
            let mut left = self.countdown.lock();
            if *left > 0 {
                *left -= 1;
                return Err(SendFailed("flaky".to_string()));
            }
            self.delivered.lock().push(payload.id.clone());
            Ok(())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let queue = PersistentQueue::open(dir.path().join("q.log")).unwrap();
    let metrics = Arc::new(MetricsRegistry::new());
    let sender = FlakySender {
        countdown: Arc::new(Mutex::new(2)),
        delivered: Arc::new(Mutex::new(Vec::new())),
    };
    let client = TelemetryClient::with_clock(
        config,
        queue,
        metrics.clone(),
        sender.clone(),
        FakeClock::new(),
    );
    client.start();

    client.send(payload("flaky"));

    let delivered = sender.delivered.clone();
    eventually(move || delivered.lock().len() == 1).await;
    assert_eq!(client.queue_depth(), 0);
    assert_eq!(metrics.counter("telemetry.sent", &[]), 1);
    client.stop().await;
}
