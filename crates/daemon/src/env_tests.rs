// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::HashMap;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> =
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn empty_environment_yields_defaults() {
    let config = load_config_from(|_| None).unwrap();
    assert_eq!(config.device_id, "edge-001");
    assert_eq!(config.flush_interval, Duration::from_secs(30));
    assert_eq!(config.max_restarts, 10);
    assert_eq!(config.workers, vec![demo_worker()]);
}

#[test]
fn overrides_are_applied() {
    let config = load_config_from(lookup(&[
        ("VIGIL_DEVICE_ID", "gw-42"),
        ("VIGIL_TELEMETRY_ENDPOINT", "https://ingest.example/telemetry"),
        ("VIGIL_FLUSH_INTERVAL", "5s"),
        ("VIGIL_CIRCUIT_FAILURE_THRESHOLD", "7"),
        ("VIGIL_TEMP_THRESHOLD", "82.5"),
        ("VIGIL_WORKERS", "cam:ffmpeg -i /dev/video0:true,upl:uploader --spool /var/spool:false"),
    ]))
    .unwrap();

    assert_eq!(config.device_id, "gw-42");
    assert_eq!(config.telemetry_endpoint, "https://ingest.example/telemetry");
    assert_eq!(config.flush_interval, Duration::from_secs(5));
    assert_eq!(config.circuit_failure_threshold, 7);
    assert_eq!(config.temp_threshold, 82.5);
    assert_eq!(config.workers.len(), 2);
    assert_eq!(config.workers[0].name, "cam");
    assert!(config.workers[0].essential);
    assert_eq!(config.workers[1].command, "uploader --spool /var/spool");
}

#[yare::parameterized(
    bad_duration  = { "VIGIL_FLUSH_INTERVAL", "soon" },
    bad_number    = { "VIGIL_MAX_RESTARTS", "-1" },
    bad_percent   = { "VIGIL_CPU_THRESHOLD", "lots" },
    bad_workers   = { "VIGIL_WORKERS", "name-only" },
)]
fn invalid_values_are_fatal(key: &str, value: &str) {
    assert!(load_config_from(lookup(&[(key, value)])).is_err());
}

#[test]
fn blank_workers_fall_back_to_demo() {
    let config = load_config_from(lookup(&[("VIGIL_WORKERS", " , ")])).unwrap();
    assert_eq!(config.workers, vec![demo_worker()]);
}

#[test]
fn state_dir_defaults_to_var_lib() {
    // Only checks the fallback; the env override path is exercised in
    // integration runs where VIGIL_STATE_DIR is set by the harness.
    if std::env::var("VIGIL_STATE_DIR").is_err() {
        assert_eq!(state_dir(), PathBuf::from("/var/lib/vigild"));
    }
}
