//! The version/next-version double-sample discipline.
//!
//! A writer increments `next_version` before mutating and publishes
//! `version = next_version` afterwards; a reader that needs several
//! fields to be mutually consistent samples `version` before the
//! read and `next_version` after it, and retries when they differ.

use std::sync::atomic::{AtomicU64, Ordering};

/// Runs `f` until it observes a quiescent version window.
///
/// `f` may run any number of times; it must not have side effects
/// beyond its return value.
pub(crate) fn read<R>(
    version: &AtomicU64,
    next_version: &AtomicU64,
    mut f: impl FnMut() -> R,
) -> R {
    let mut attempt = 0_u32;
    loop {
        let before = version.load(Ordering::Acquire);
        let out = f();
        if next_version.load(Ordering::Acquire) == before {
            return out;
        }
        backoff(attempt);
        attempt += 1;
    }
}

fn backoff(attempt: u32) {
    if attempt < 10 {
        for _ in 0..(1_u32 << attempt.min(6)) {
            std::hint::spin_loop();
        }
    } else {
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };

    #[test]
    fn quiescent_read_returns_first_result() {
        let version = AtomicU64::new(7);
        let next_version = AtomicU64::new(7);
        let mut calls = 0;
        let out = read(&version, &next_version, || {
            calls += 1;
            42
        });
        assert_eq!(out, 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn retries_until_writer_publishes() {
        let version = Arc::new(AtomicU64::new(1));
        let next_version = Arc::new(AtomicU64::new(2));

        let mut calls = 0;
        let out = read(&version, &next_version, || {
            calls += 1;
            if calls == 3 {
                // Writer publishes mid-read.
                version.store(2, Ordering::Release);
            }
            calls
        });
        // The successful attempt is the first one that saw version == next_version.
        assert!(out >= 3);
    }
}
