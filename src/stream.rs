//! Shared atomics for splitting one counter range across solver threads.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Hands out counters `start..=last` exactly once each.
#[derive(Debug)]
pub struct CounterSource {
    next: AtomicU64,
    last: u64,
}

impl CounterSource {
    pub const fn new(start: u64, last: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
            last,
        }
    }

    /// Reserve the next counter, or `None` once the range is spent.
    #[inline]
    pub fn fetch(&self) -> Option<u64> {
        let counter = self.next.fetch_add(1, Ordering::Relaxed);
        (counter <= self.last).then_some(counter)
    }
}

#[derive(Debug)]
pub struct StopFlag {
    stop: AtomicBool,
}

impl StopFlag {
    pub const fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn force_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Default for StopFlag {
    fn default() -> Self {
        Self::new()
    }
}
