// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable FIFO queue backed by an append-only op log.
//!
//! Each mutation appends one JSON line and is flushed and fsynced before the
//! call returns, so an abrupt power loss never loses an acknowledged op. The
//! log is replayed into an in-memory index at open; a torn final line (the
//! one write that may have been interrupted) is dropped with a warning.
//! When dead ops dominate the log, it is compacted by rewriting the live
//! entries to a temp file and atomically renaming it into place.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use vigil_core::TelemetryPayload;

/// Compaction is considered once the log carries this many ops.
const COMPACT_MIN_OPS: usize = 1024;

/// Queue I/O errors. Durability cannot be guaranteed past one of these, so
/// the supervisor treats them as fatal.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("queue log corrupt at line {line}: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode queue op: {0}")]
    Encode(#[source] serde_json::Error),
}

/// One durable row: payload plus queue bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: u64,
    pub payload: TelemetryPayload,
    /// Enqueue time, epoch milliseconds
    pub enqueued_at: u64,
    pub attempt_count: u32,
}

/// Ops recorded in the log, one JSON line each.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogOp {
    Push {
        id: u64,
        payload: TelemetryPayload,
        enqueued_at: u64,
        /// Non-zero only in compacted logs, where it carries the attempt
        /// count accumulated before the rewrite.
        #[serde(default, skip_serializing_if = "is_zero")]
        attempts: u32,
    },
    Remove {
        id: u64,
    },
    Attempt {
        id: u64,
    },
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// Append-ordered durable queue of telemetry payloads, indexed by id.
pub struct PersistentQueue {
    path: PathBuf,
    file: File,
    entries: BTreeMap<u64, QueueEntry>,
    next_id: u64,
    /// Total ops in the log file, live and dead.
    log_ops: usize,
}

impl PersistentQueue {
    /// Open (or create) the queue at `path`, replaying any existing log.
    ///
    /// The parent directory is created mode 0750 and the log file mode 0600.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::DirBuilder::new().recursive(true).mode(0o750).create(parent)?;
            }
        }

        let mut entries = BTreeMap::new();
        let mut next_id = 1;
        let mut log_ops = 0;

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;
            let total = lines.len();
            for (idx, line) in lines.iter().enumerate() {
                if line.is_empty() {
                    continue;
                }
                let op: LogOp = match serde_json::from_str(line) {
                    Ok(op) => op,
                    // A torn tail is the expected crash artifact; anything
                    // earlier means real corruption.
                    Err(_) if idx + 1 == total => {
                        tracing::warn!(line = idx + 1, "dropping torn tail line in queue log");
                        break;
                    }
                    Err(source) => return Err(QueueError::Corrupt { line: idx + 1, source }),
                };
                log_ops += 1;
                match op {
                    LogOp::Push { id, payload, enqueued_at, attempts } => {
                        next_id = next_id.max(id + 1);
                        entries.insert(
                            id,
                            QueueEntry { id, payload, enqueued_at, attempt_count: attempts },
                        );
                    }
                    LogOp::Remove { id } => {
                        entries.remove(&id);
                    }
                    LogOp::Attempt { id } => {
                        if let Some(entry) = entries.get_mut(&id) {
                            entry.attempt_count += 1;
                        }
                    }
                }
            }
        }

        let file = Self::open_append(&path)?;
        tracing::debug!(
            path = %path.display(),
            entries = entries.len(),
            log_ops,
            "persistent queue opened"
        );
        Ok(Self { path, file, entries, next_id, log_ops })
    }

    fn open_append(path: &Path) -> Result<File, QueueError> {
        Ok(OpenOptions::new().create(true).append(true).mode(0o600).open(path)?)
    }

    /// Append a payload; returns the assigned id. Committed before return.
    pub fn push(&mut self, payload: &TelemetryPayload) -> Result<u64, QueueError> {
        let id = self.next_id;
        self.next_id += 1;
        let enqueued_at = epoch_ms();
        self.append_op(&LogOp::Push {
            id,
            payload: payload.clone(),
            enqueued_at,
            attempts: 0,
        })?;
        self.entries.insert(
            id,
            QueueEntry { id, payload: payload.clone(), enqueued_at, attempt_count: 0 },
        );
        Ok(id)
    }

    /// The oldest `n` entries in ascending id order.
    pub fn peek_batch(&self, n: usize) -> Vec<QueueEntry> {
        self.entries.values().take(n).cloned().collect()
    }

    /// Remove an entry by id. Removing an unknown id is a no-op.
    pub fn remove(&mut self, id: u64) -> Result<(), QueueError> {
        if self.entries.remove(&id).is_none() {
            tracing::debug!(id, "remove for unknown queue id");
            return Ok(());
        }
        self.append_op(&LogOp::Remove { id })?;
        self.maybe_compact()
    }

    /// Record a failed delivery attempt against an entry.
    pub fn record_attempt(&mut self, id: u64) -> Result<(), QueueError> {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Ok(());
        };
        entry.attempt_count += 1;
        self.append_op(&LogOp::Attempt { id })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn append_op(&mut self, op: &LogOp) -> Result<(), QueueError> {
        let mut line = serde_json::to_string(op).map_err(QueueError::Encode)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.file.sync_data()?;
        self.log_ops += 1;
        Ok(())
    }

    /// Rewrite the log when dead ops dominate it.
    fn maybe_compact(&mut self) -> Result<(), QueueError> {
        let live = self.entries.len();
        if self.log_ops < COMPACT_MIN_OPS || self.log_ops < live * 2 {
            return Ok(());
        }
        self.compact()
    }

    /// Rewrite the log to contain only live entries, then atomically swap it
    /// into place.
    pub fn compact(&mut self) -> Result<(), QueueError> {
        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(0o600)
                .open(&tmp_path)?;
            for entry in self.entries.values() {
                let op = LogOp::Push {
                    id: entry.id,
                    payload: entry.payload.clone(),
                    enqueued_at: entry.enqueued_at,
                    attempts: entry.attempt_count,
                };
                let mut line = serde_json::to_string(&op).map_err(QueueError::Encode)?;
                line.push('\n');
                tmp.write_all(line.as_bytes())?;
            }
            tmp.flush()?;
            tmp.sync_data()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        self.file = Self::open_append(&self.path)?;
        let old_ops = self.log_ops;
        self.log_ops = self.entries.len();
        tracing::info!(
            path = %self.path.display(),
            before = old_ops,
            after = self.log_ops,
            "compacted queue log"
        );
        Ok(())
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
