// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    first  = { 1, Duration::from_secs(2) },
    second = { 2, Duration::from_secs(4) },
    third  = { 3, Duration::from_secs(8) },
    fourth = { 4, Duration::from_secs(16) },
)]
fn base_delay_doubles(attempt: u32, expected: Duration) {
    let policy = RetryPolicy::new(3, Duration::from_secs(2));
    assert_eq!(policy.base_delay(attempt), expected);
}

#[test]
fn base_delay_is_capped() {
    let policy = RetryPolicy::new(10, Duration::from_secs(2));
    assert_eq!(policy.base_delay(5), Duration::from_secs(30));
    assert_eq!(policy.base_delay(30), Duration::from_secs(30));
}

#[test]
fn huge_attempt_numbers_do_not_overflow() {
    let policy = RetryPolicy::new(10, Duration::from_secs(2));
    assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(30));
}

#[test]
fn jittered_delay_stays_within_half_to_full_base() {
    let policy = RetryPolicy::new(3, Duration::from_secs(2));
    for attempt in 1..=5 {
        let base = policy.base_delay(attempt);
        for _ in 0..50 {
            let delay = policy.delay_for(attempt);
            assert!(delay <= base, "delay {:?} above base {:?}", delay, base);
            assert!(delay >= base / 2, "delay {:?} below half base {:?}", delay, base);
        }
    }
}

#[test]
fn zero_initial_delay_yields_zero() {
    let policy = RetryPolicy::new(3, Duration::ZERO);
    assert_eq!(policy.delay_for(1), Duration::ZERO);
}
