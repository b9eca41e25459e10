use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::source::ClockSource;

/// Host time access for the correlation engine.
///
/// Implementations must be monotonic non-decreasing per source; the engine computes deltas with
/// wrapping subtraction and performs no backward-jump detection.
pub trait HostClock: Send + Sync {
    /// Current host time in nanoseconds on the given source.
    fn now_ns(&self, source: ClockSource) -> u64;

    /// Monotonic time for the workload-estimation record field.
    ///
    /// Returns `None` on builds where the monotonic source is unavailable; callers log the
    /// condition and leave the record field at its default.
    fn mono_ns(&self) -> Option<u64> {
        Some(self.now_ns(ClockSource::Monotonic))
    }
}

/// Current host time in microseconds on the given source.
pub fn now_us(clock: &dyn HostClock, source: ClockSource) -> u64 {
    clock.now_ns(source) / 1_000
}

/// Production host clock.
///
/// On Linux each [`ClockSource`] maps to its `clock_gettime` analog; `Scheduler` uses
/// `CLOCK_MONOTONIC_COARSE`, the fast low-resolution variant standing in for the in-kernel
/// scheduler clock, which userspace cannot read directly. Elsewhere all sources fall back to a
/// single `Instant`-based monotonic clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemHostClock;

#[cfg(target_os = "linux")]
impl HostClock for SystemHostClock {
    fn now_ns(&self, source: ClockSource) -> u64 {
        let clock_id = match source {
            ClockSource::Monotonic => libc::CLOCK_MONOTONIC,
            ClockSource::MonotonicRaw => libc::CLOCK_MONOTONIC_RAW,
            ClockSource::Scheduler => libc::CLOCK_MONOTONIC_COARSE,
        };

        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid out-pointer and every clock id above exists on Linux.
        let rc = unsafe { libc::clock_gettime(clock_id, &mut ts) };
        debug_assert_eq!(rc, 0, "clock_gettime({clock_id}) failed");

        (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
    }
}

#[cfg(not(target_os = "linux"))]
impl HostClock for SystemHostClock {
    fn now_ns(&self, _source: ClockSource) -> u64 {
        use std::sync::OnceLock;
        use std::time::Instant;

        static EPOCH: OnceLock<Instant> = OnceLock::new();
        let epoch = *EPOCH.get_or_init(Instant::now);
        Instant::now().duration_since(epoch).as_nanos() as u64
    }
}

/// Deterministic clock for tests: every source reads the same manually advanced instant.
pub struct FakeHostClock {
    now_ns: AtomicU64,
    mono_available: AtomicBool,
}

impl FakeHostClock {
    pub fn new(start_ns: u64) -> Self {
        Self {
            now_ns: AtomicU64::new(start_ns),
            mono_available: AtomicBool::new(true),
        }
    }

    pub fn advance_ns(&self, delta_ns: u64) {
        self.now_ns.fetch_add(delta_ns, Ordering::Relaxed);
    }

    pub fn advance_us(&self, delta_us: u64) {
        self.advance_ns(delta_us * 1_000);
    }

    /// Simulate a specialized build without a monotonic time source.
    pub fn set_mono_available(&self, available: bool) {
        self.mono_available.store(available, Ordering::Relaxed);
    }
}

impl Default for FakeHostClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl HostClock for FakeHostClock {
    fn now_ns(&self, _source: ClockSource) -> u64 {
        self.now_ns.load(Ordering::Relaxed)
    }

    fn mono_ns(&self) -> Option<u64> {
        if self.mono_available.load(Ordering::Relaxed) {
            Some(self.now_ns(ClockSource::Monotonic))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fake_clock_advances_deterministically() {
        let clock = FakeHostClock::new(1_000);
        assert_eq!(clock.now_ns(ClockSource::Monotonic), 1_000);

        clock.advance_us(3);
        assert_eq!(clock.now_ns(ClockSource::MonotonicRaw), 4_000);
        assert_eq!(now_us(&clock, ClockSource::Scheduler), 4);
    }

    #[test]
    fn fake_clock_can_drop_the_mono_source() {
        let clock = FakeHostClock::new(5);
        assert_eq!(clock.mono_ns(), Some(5));

        clock.set_mono_available(false);
        assert_eq!(clock.mono_ns(), None);
    }

    #[test]
    fn system_clock_is_monotonic_non_decreasing() {
        let clock = SystemHostClock;
        for source in [
            ClockSource::Monotonic,
            ClockSource::MonotonicRaw,
            ClockSource::Scheduler,
        ] {
            let a = clock.now_ns(source);
            let b = clock.now_ns(source);
            assert!(b >= a, "{} went backwards: {a} -> {b}", source.name());
        }
    }
}
