//! Access to the GPU's free-running cycle counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Reads the hardware tick value. Implemented over the device's register interface in production;
/// assumed monotonic non-decreasing modulo wraparound.
pub trait TickSource: Send + Sync {
    fn read_ticks(&self) -> u64;
}

/// Deterministic tick counter for tests, advanced manually.
pub struct FakeTickSource {
    ticks: AtomicU64,
    reads: AtomicU64,
}

impl FakeTickSource {
    pub fn new(start: u64) -> Self {
        Self {
            ticks: AtomicU64::new(start),
            reads: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, delta: u64) {
        self.ticks.fetch_add(delta, Ordering::Relaxed);
    }

    /// Number of times the counter was read; lets tests assert the hardware was left untouched.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl Default for FakeTickSource {
    fn default() -> Self {
        Self::new(0)
    }
}

impl TickSource for FakeTickSource {
    fn read_ticks(&self) -> u64 {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.ticks.load(Ordering::Relaxed)
    }
}
