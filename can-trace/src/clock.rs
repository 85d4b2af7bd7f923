//! Time source for capture timestamps and replay scheduling
//!
//! The system clock samples the wall clock once and advances it with a
//! monotonic `Instant`, so timestamps line up with real time but never jump
//! backwards when the system time is adjusted.

use chrono::Utc;
use std::thread;
use std::time::{Duration, Instant};

/// Source of "now" and of blocking sleeps
pub trait Clock: Send + Sync {
    /// Microseconds since the Unix epoch
    fn now_micros(&self) -> u64;

    /// Block the calling thread for `duration`
    fn sleep(&self, duration: Duration);
}

/// Wall-clock anchored monotonic clock
#[derive(Debug, Clone)]
pub struct SystemClock {
    wall_origin_us: u64,
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let wall_origin_us = u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0);
        Self {
            wall_origin_us,
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        let elapsed = u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.wall_origin_us.saturating_add(elapsed)
    }

    fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(duration);
        }
    }
}
