//! Sliding-window rate limiter.
//!
//! [`SlidingWindowLimiter`] is a time-window admission gate: `acquire()`
//! suspends the caller for the minimal time such that, upon return,
//! admissions stay within `limit` events per rolling `interval`. Events
//! are counted only within the trailing window and pruned continuously.
//!
//! # Algorithm
//!
//! Under a single critical section: read the monotonic clock, prune
//! admission timestamps older than `interval`, and admit immediately if
//! the window has room. Otherwise compute how long until the oldest
//! admission falls out of the window, release the lock, sleep, and retry.
//!
//! # Known limitation
//!
//! Callers woken simultaneously re-race for the lock, so admission order
//! among concurrent waiters is not FIFO and wakeups can be wasted (a
//! thundering herd under contention). A slot-reservation variant that
//! wakes exactly one waiter per freed slot would fix this; this limiter
//! deliberately stays with the simpler retry loop.
//!
//! All clock reads use [`tokio::time::Instant`], so deadline arithmetic
//! and sleeps share one monotonic source and the paused test clock
//! governs both.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::error::ConfigError;

/// A sliding-window admission gate.
///
/// Shared across callers as `Arc<SlidingWindowLimiter>`; every
/// [`acquire`](Self::acquire) that returns counts as one admission.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    /// Maximum admissions per window.
    limit: usize,

    /// Length of the rolling window.
    interval: Duration,

    /// Timestamps of admissions still inside the window, oldest first.
    /// Length never exceeds `limit` after pruning.
    history: Mutex<VecDeque<Instant>>,

    /// Total admissions since construction (for stats).
    admitted: AtomicU64,
}

impl SlidingWindowLimiter {
    /// Creates a limiter admitting at most `limit` events per `interval`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `limit` is zero or `interval` is a zero
    /// duration.
    pub fn new(limit: usize, interval: Duration) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::ZeroRateLimit);
        }
        if interval.is_zero() {
            return Err(ConfigError::ZeroRateWindow);
        }

        Ok(Self {
            limit,
            interval,
            history: Mutex::new(VecDeque::with_capacity(limit)),
            admitted: AtomicU64::new(0),
        })
    }

    /// Suspends until admitting the caller keeps the window within its
    /// limit, then records the admission and returns.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut history = self.history.lock().expect("limiter mutex poisoned");
                let now = Instant::now();

                while let Some(&oldest) = history.front() {
                    if now.duration_since(oldest) >= self.interval {
                        history.pop_front();
                    } else {
                        break;
                    }
                }

                if history.len() < self.limit {
                    history.push_back(now);
                    self.admitted.fetch_add(1, Ordering::Relaxed);
                    return;
                }

                // Window is full: wait until the oldest admission ages out,
                // then re-race for the lock.
                self.interval - now.duration_since(history[0])
            };

            trace!(wait_ms = wait.as_millis() as u64, "rate window full, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Returns the configured admission limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the configured window length.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the number of admissions currently inside the window.
    pub fn in_window(&self) -> usize {
        let mut history = self.history.lock().expect("limiter mutex poisoned");
        let now = Instant::now();
        while let Some(&oldest) = history.front() {
            if now.duration_since(oldest) >= self.interval {
                history.pop_front();
            } else {
                break;
            }
        }
        history.len()
    }

    /// Returns the total number of admissions since construction.
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }
}
