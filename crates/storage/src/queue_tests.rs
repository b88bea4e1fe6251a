// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use std::io::Write as _;
use tempfile::tempdir;
use vigil_core::TelemetryPayload;

fn payload(kind: &str) -> TelemetryPayload {
    TelemetryPayload::event(kind, "edge-test", json!({"n": 1}))
}

#[test]
fn open_creates_file_and_parent_dir() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state").join("telemetry.queue");

    let queue = PersistentQueue::open(&path).unwrap();

    assert!(path.exists());
    assert!(queue.is_empty());
}

#[test]
fn push_then_peek_returns_payload() {
    let dir = tempdir().unwrap();
    let mut queue = PersistentQueue::open(dir.path().join("q.log")).unwrap();

    let sent = payload("overheat");
    let id = queue.push(&sent).unwrap();

    let batch = queue.peek_batch(10);
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, id);
    assert_eq!(batch[0].payload, sent);
    assert_eq!(batch[0].attempt_count, 0);
}

#[test]
fn ids_ascend_and_batches_are_fifo() {
    let dir = tempdir().unwrap();
    let mut queue = PersistentQueue::open(dir.path().join("q.log")).unwrap();

    let ids: Vec<u64> = (0..5).map(|_| queue.push(&payload("hb")).unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);

    let batch = queue.peek_batch(3);
    assert_eq!(batch.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[test]
fn reopen_restores_entries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("q.log");
    let sent = payload("recover");

    {
        let mut queue = PersistentQueue::open(&path).unwrap();
        queue.push(&sent).unwrap();
        queue.push(&payload("hb")).unwrap();
    }

    let queue = PersistentQueue::open(&path).unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.peek_batch(1)[0].payload, sent);

    // New pushes keep ascending past recovered ids
    let mut queue = queue;
    assert_eq!(queue.push(&payload("hb")).unwrap(), 3);
}

#[test]
fn remove_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("q.log");

    {
        let mut queue = PersistentQueue::open(&path).unwrap();
        let first = queue.push(&payload("a")).unwrap();
        queue.push(&payload("b")).unwrap();
        queue.remove(first).unwrap();
    }

    let queue = PersistentQueue::open(&path).unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.peek_batch(1)[0].payload.kind, "b");
}

#[test]
fn remove_unknown_id_is_noop() {
    let dir = tempdir().unwrap();
    let mut queue = PersistentQueue::open(dir.path().join("q.log")).unwrap();
    queue.remove(99).unwrap();
    assert!(queue.is_empty());
}

#[test]
fn attempt_counts_persist() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("q.log");

    {
        let mut queue = PersistentQueue::open(&path).unwrap();
        let id = queue.push(&payload("a")).unwrap();
        queue.record_attempt(id).unwrap();
        queue.record_attempt(id).unwrap();
    }

    let queue = PersistentQueue::open(&path).unwrap();
    assert_eq!(queue.peek_batch(1)[0].attempt_count, 2);
}

#[test]
fn torn_tail_line_is_dropped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("q.log");

    {
        let mut queue = PersistentQueue::open(&path).unwrap();
        queue.push(&payload("a")).unwrap();
    }
    // Simulate a crash mid-append.
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"{\"op\":\"push\",\"id\":2,\"pay").unwrap();
    drop(file);

    let queue = PersistentQueue::open(&path).unwrap();
    assert_eq!(queue.len(), 1);
}

#[test]
fn corrupt_interior_line_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("q.log");

    std::fs::write(&path, b"not json\n{\"op\":\"remove\",\"id\":1}\n").unwrap();

    match PersistentQueue::open(&path) {
        Err(QueueError::Corrupt { line, .. }) => assert_eq!(line, 1),
        other => panic!("expected Corrupt error, got {:?}", other.map(|q| q.len())),
    }
}

#[test]
fn compaction_preserves_live_entries_and_attempts() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("q.log");
    let mut queue = PersistentQueue::open(&path).unwrap();

    let keep = queue.push(&payload("keep")).unwrap();
    let drop_id = queue.push(&payload("drop")).unwrap();
    queue.record_attempt(keep).unwrap();
    queue.remove(drop_id).unwrap();

    queue.compact().unwrap();

    assert_eq!(queue.len(), 1);
    let entry = &queue.peek_batch(1)[0];
    assert_eq!(entry.payload.kind, "keep");
    assert_eq!(entry.attempt_count, 1);

    // Compacted log replays to the same state.
    drop(queue);
    let queue = PersistentQueue::open(&path).unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.peek_batch(1)[0].attempt_count, 1);
}

#[test]
fn file_is_not_world_accessible() {
    use std::os::unix::fs::MetadataExt;
    let dir = tempdir().unwrap();
    let path = dir.path().join("q.log");
    let _queue = PersistentQueue::open(&path).unwrap();
    let mode = std::fs::metadata(&path).unwrap().mode();
    assert_eq!(mode & 0o077, 0, "queue file leaks permissions: {:o}", mode);
}
