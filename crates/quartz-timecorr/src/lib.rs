//! GPU time correlation and frequency calibration.
//!
//! A calibration window opens on power-on and after a DVFS transition, and closes before
//! power-off and before a DVFS transition (power-on → dvfs → dvfs → power-off, with each arrow a
//! window). The host and GPU timers are correlated at the start of each window together with the
//! (possibly calibrated) current GPU frequency. If the frequency did not change across a
//! power-off/on sequence or a DVFS transition — the transition didn't really happen — consecutive
//! windows are merged: the longer the window, the better the computed clock speed. Correlation
//! and calibration also run periodically, on a best-effort basis that never blocks the caller.

pub mod calibrate;
pub mod dvfs;
pub mod engine;
pub mod ticks;
pub mod trace;
pub mod window;

pub use engine::{DriverRole, TimeCorr, TimeCorrConfig};
pub use ticks::{FakeTickSource, TickSource};
pub use trace::{NullTraceSink, RecordingTraceSink, TraceSink};
pub use window::{CalibrationTier, CalibrationWindow, TierDurations};
