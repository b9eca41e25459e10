//! Quartz: GPU clock correlation and frequency calibration.
//!
//! The engine lives in [`timecorr`]; [`shared`] holds the record ring mapped by external
//! readers, and [`clock`] the host clock-source plumbing.

pub use quartz_clock as clock;
pub use quartz_shared as shared;
pub use quartz_timecorr as timecorr;
