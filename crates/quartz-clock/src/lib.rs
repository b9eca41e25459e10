//! Host clock-source selection and time reading for GPU time correlation.
//!
//! Timestamps taken under different clock sources are not comparable, so the active source is a
//! per-device selection with a documented single-writer discipline: mutation happens only inside
//! the calibration bracket of the correlation engine, while reads are lock-free and may come from
//! any context.

mod host;
mod source;

pub use host::{now_us, FakeHostClock, HostClock, SystemHostClock};
pub use source::{ClockSource, ClockSourceCell, InvalidClockSource};
