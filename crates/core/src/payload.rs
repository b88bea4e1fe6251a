// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Telemetry payload model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One outbound telemetry record.
///
/// Wire format is the JSON serialization of this struct, POSTed with
/// `Content-Type: application/json`. The id is assigned at construction and
/// is unique for the process lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub device_id: String,
    pub body: Map<String, Value>,
}

impl TelemetryPayload {
    /// Build an event payload stamped with a fresh id and the current time.
    pub fn event(kind: impl Into<String>, device_id: impl Into<String>, body: Value) -> Self {
        let body = match body {
            Value::Object(map) => map,
            other => {
                // Non-object bodies are wrapped so the wire shape stays stable.
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            id: new_payload_id(),
            timestamp: Utc::now(),
            kind: kind.into(),
            device_id: device_id.into(),
            body,
        }
    }
}

/// Generate a payload id: `tel-` prefix plus a 19-char nanoid.
pub fn new_payload_id() -> String {
    format!("tel-{}", nanoid::nanoid!(19))
}

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
