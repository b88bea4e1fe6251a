// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::tempdir;
use vigil_core::WorkerEntry;
use vigil_orchestrator::WorkerState;

fn worker(name: &str, command: &str, essential: bool) -> WorkerEntry {
    WorkerEntry { name: name.to_string(), command: command.to_string(), essential }
}

/// Config pointed at a dead endpoint with fast retries, so tests never wait
/// on real backoff.
fn test_config(workers: Vec<WorkerEntry>) -> SupervisorConfig {
    SupervisorConfig {
        device_id: "edge-test".to_string(),
        telemetry_endpoint: "http://127.0.0.1:9/telemetry".to_string(),
        retry_max_attempts: 1,
        retry_initial_delay: Duration::from_millis(1),
        circuit_failure_threshold: 3,
        grace_period: Duration::from_secs(2),
        heartbeat_interval: Duration::from_secs(3600),
        flush_interval: Duration::from_secs(3600),
        health_interval: Duration::from_secs(3600),
        watchdog_interval: Duration::from_secs(3600),
        workers,
        ..SupervisorConfig::default()
    }
}

#[tokio::test]
async fn build_registers_workers_and_takes_the_pid_lock() {
    let dir = tempdir().unwrap();
    let config = test_config(vec![
        worker("a", "sleep 600", true),
        worker("b", "sleep 600", false),
    ]);

    let supervisor = Supervisor::build(config.clone(), dir.path()).await.unwrap();

    let names: Vec<String> =
        supervisor.orchestrator.statuses().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert!(dir.path().join("vigild.pid").exists());

    // A second daemon over the same state dir must refuse to start.
    match Supervisor::build(config, dir.path()).await {
        Err(StartupError::LockFailed(_)) => {}
        other => panic!("expected LockFailed, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn bad_worker_command_fails_startup() {
    let dir = tempdir().unwrap();
    let config = test_config(vec![worker("w", "sh -c 'unterminated", false)]);
    assert!(matches!(
        Supervisor::build(config, dir.path()).await,
        Err(StartupError::Worker(_))
    ));
}

#[tokio::test]
async fn graceful_shutdown_stops_workers_and_preserves_queue() {
    let dir = tempdir().unwrap();
    let config = test_config(vec![
        worker("a", "sleep 600", false),
        worker("b", "sleep 600", false),
        worker("c", "sleep 600", true),
    ]);
    let supervisor = Supervisor::build(config, dir.path()).await.unwrap();

    supervisor.telemetry.start();
    supervisor.orchestrator.start_all();
    supervisor.orchestrator.start_watchdog();
    supervisor.health.start();

    for n in 0..10 {
        supervisor.telemetry.send(TelemetryPayload::event(
            "reading",
            "edge-test",
            json!({"n": n}),
        ));
    }

    // The endpoint refuses connections: everything must land in the queue.
    for _ in 0..500 {
        if supervisor.telemetry.queue_depth() == 10 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(supervisor.telemetry.queue_depth(), 10);

    supervisor.shutdown().await;

    for name in ["a", "b", "c"] {
        assert_eq!(supervisor.orchestrator.worker_state(name), Some(WorkerState::Stopped));
        assert!(!supervisor.orchestrator.is_alive(name).unwrap());
    }
    // Undelivered payloads survive shutdown for the next run.
    assert_eq!(supervisor.telemetry.queue_depth(), 10);
}

#[tokio::test]
async fn heartbeat_carries_worker_snapshot() {
    let dir = tempdir().unwrap();
    let config = test_config(vec![worker("w", "sleep 600", false)]);
    let supervisor = Supervisor::build(config, dir.path()).await.unwrap();

    supervisor.send_heartbeat();
    supervisor.send_heartbeat();

    assert_eq!(supervisor.metrics.counter("supervisor.heartbeats", &[]), 2);
}
