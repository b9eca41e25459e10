use std::sync::atomic::{AtomicU32, Ordering};

/// Host clock variants usable for time correlation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum ClockSource {
    /// `CLOCK_MONOTONIC`: NTP-disciplined monotonic time.
    #[default]
    Monotonic = 0,
    /// `CLOCK_MONOTONIC_RAW`: undisciplined hardware-based monotonic time.
    MonotonicRaw = 1,
    /// The scheduler clock: fast, coarse monotonic time.
    Scheduler = 2,
}

/// Raw ordinal was outside the valid [`ClockSource`] range; no state was changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid clock source ordinal {0}")]
pub struct InvalidClockSource(pub u32);

impl ClockSource {
    /// Short name used in log lines and by the settings surface.
    pub fn name(self) -> &'static str {
        match self {
            ClockSource::Monotonic => "mono",
            ClockSource::MonotonicRaw => "mono_raw",
            ClockSource::Scheduler => "sched",
        }
    }

    pub fn from_raw(raw: u32) -> Result<Self, InvalidClockSource> {
        match raw {
            0 => Ok(ClockSource::Monotonic),
            1 => Ok(ClockSource::MonotonicRaw),
            2 => Ok(ClockSource::Scheduler),
            _ => Err(InvalidClockSource(raw)),
        }
    }
}

impl TryFrom<u32> for ClockSource {
    type Error = InvalidClockSource;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::from_raw(raw)
    }
}

/// Per-device clock-source selection with lock-free reads.
///
/// Single logical writer: only the correlation engine's clock-source bracket stores to the cell,
/// already serialized by the device lock. Readers may run concurrently from any context.
pub struct ClockSourceCell(AtomicU32);

impl ClockSourceCell {
    pub fn new(source: ClockSource) -> Self {
        Self(AtomicU32::new(source as u32))
    }

    /// Lock-free read of the current selection.
    ///
    /// The stored ordinal can only be invalid through memory corruption or a store that bypassed
    /// [`ClockSource`] validation; that is a programmer error, asserted in debug builds and
    /// degraded to the default source with a warning in production.
    pub fn get(&self) -> ClockSource {
        let raw = self.0.load(Ordering::Relaxed);
        match ClockSource::from_raw(raw) {
            Ok(source) => source,
            Err(err) => {
                debug_assert!(false, "corrupt clock source selection: {err}");
                tracing::warn!(raw, "corrupt clock source selection, using default");
                ClockSource::default()
            }
        }
    }

    pub fn set(&self, source: ClockSource) {
        self.0.store(source as u32, Ordering::Relaxed);
    }
}

impl Default for ClockSourceCell {
    fn default() -> Self {
        Self::new(ClockSource::default())
    }
}
