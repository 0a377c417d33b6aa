//! Monotonic nanosecond time source.
//!
//! The scheduler and the calibration workers only ever see this trait, so a
//! test harness can substitute a virtual clock that advances on sleeps.

use std::time::{Duration, Instant};

pub trait Clock: Sync {
    /// Nanoseconds since an arbitrary fixed origin. Never decreases.
    fn now_ns(&self) -> u64;

    /// Suspend the calling thread for `ns` nanoseconds.
    fn sleep_ns(&self, ns: u64);

    /// Suspend until the absolute instant `deadline_ns`. Returns immediately
    /// if the deadline has already passed.
    fn sleep_until_ns(&self, deadline_ns: u64) {
        let now = self.now_ns();
        if deadline_ns > now {
            self.sleep_ns(deadline_ns - now);
        }
    }
}

/// The process monotonic clock.
pub struct Monotonic {
    origin: Instant,
}

impl Monotonic {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for Monotonic {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for Monotonic {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn sleep_ns(&self, ns: u64) {
        std::thread::sleep(Duration::from_nanos(ns));
    }
}
