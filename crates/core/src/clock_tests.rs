// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn fake_clock_advances_instant_and_epoch() {
    let clock = FakeClock::new();
    let t0 = clock.now();
    let e0 = clock.epoch_ms();

    clock.advance(Duration::from_secs(90));

    assert_eq!(clock.now() - t0, Duration::from_secs(90));
    assert_eq!(clock.epoch_ms() - e0, 90_000);
}

#[test]
fn fake_clock_clones_share_time() {
    let clock = FakeClock::new();
    let other = clock.clone();

    clock.advance(Duration::from_millis(250));

    assert_eq!(other.now(), clock.now());
    assert_eq!(other.epoch_ms(), clock.epoch_ms());
}

#[test]
fn system_clock_epoch_is_plausible() {
    let clock = SystemClock;
    // After 2020-01-01 in milliseconds.
    assert!(clock.epoch_ms() > 1_577_836_800_000);
}
