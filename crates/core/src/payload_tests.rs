// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn serde_roundtrip_is_identity() {
    let payload = TelemetryPayload::event(
        "overheat",
        "edge-001",
        json!({"temp_c": 81.5, "threshold": 75.0}),
    );
    let encoded = serde_json::to_string(&payload).unwrap();
    let decoded: TelemetryPayload = serde_json::from_str(&encoded).unwrap();
    assert_eq!(payload, decoded);
}

#[test]
fn wire_shape_has_expected_fields() {
    let payload = TelemetryPayload::event("heartbeat", "gw-7", json!({"uptime_s": 12}));
    let value = serde_json::to_value(&payload).unwrap();
    let obj = value.as_object().unwrap();
    assert!(obj.contains_key("id"));
    assert!(obj.contains_key("timestamp"));
    assert_eq!(obj["kind"], "heartbeat");
    assert_eq!(obj["device_id"], "gw-7");
    assert_eq!(obj["body"]["uptime_s"], 12);
}

#[test]
fn non_object_body_is_wrapped() {
    let payload = TelemetryPayload::event("raw", "edge-001", json!(42));
    assert_eq!(payload.body.get("value"), Some(&json!(42)));
}

#[test]
fn ids_are_unique_and_prefixed() {
    let a = new_payload_id();
    let b = new_payload_id();
    assert_ne!(a, b);
    assert!(a.starts_with("tel-"));
    assert_eq!(a.len(), 23);
}
