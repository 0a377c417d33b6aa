//! Mutual-exclusion gate around the shared I²C bus.
//!
//! The bus permits one transaction at a time. A holder's critical section is
//! a single transaction, tens of microseconds, so the gate spins with
//! `thread::yield_now` instead of taking a mutex. The counter is 0 when the
//! bus is free and 1 while a transaction is in flight.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

#[derive(Debug, Default)]
pub struct Bus {
    stat: AtomicU32,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            stat: AtomicU32::new(0),
        }
    }

    /// Block until the bus is free, then mark it busy.
    ///
    /// The returned guard releases the bus when dropped, on every exit path.
    pub fn enter(&self) -> BusGuard<'_> {
        loop {
            while self.stat.load(Ordering::Relaxed) != 0 {
                thread::yield_now();
            }
            if self
                .stat
                .compare_exchange(0, 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return BusGuard { bus: self };
            }
        }
    }

    /// Current transaction count: 0 = free, 1 = busy.
    pub fn stat(&self) -> u32 {
        self.stat.load(Ordering::SeqCst)
    }

    fn leave(&self) {
        self.stat.fetch_sub(1, Ordering::Release);
    }
}

pub struct BusGuard<'a> {
    bus: &'a Bus,
}

impl Drop for BusGuard<'_> {
    fn drop(&mut self) {
        self.bus.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Arc;

    #[test]
    fn guard_releases_on_drop() {
        let bus = Bus::new();
        {
            let _guard = bus.enter();
            assert_eq!(bus.stat(), 1);
        }
        assert_eq!(bus.stat(), 0);
    }

    #[test]
    fn guard_releases_on_panic() {
        let bus = Arc::new(Bus::new());
        let b = Arc::clone(&bus);
        let result = std::thread::spawn(move || {
            let _guard = b.enter();
            panic!("transaction failed");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(bus.stat(), 0);
    }

    #[test]
    fn transactions_are_disjoint() {
        let bus = Arc::new(Bus::new());
        let inside = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let bus = Arc::clone(&bus);
            let inside = Arc::clone(&inside);
            let overlaps = Arc::clone(&overlaps);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let _guard = bus.enter();
                    if inside.swap(true, Ordering::SeqCst) {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    std::hint::spin_loop();
                    inside.store(false, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(bus.stat(), 0);
    }
}
