//! Calibration windows: the open intervals over which tick/host-time deltas accumulate.

use crate::dvfs::{bucket_index, DvfsFrequencyTable};

/// Required accumulation tier of a calibration window.
///
/// Ordering reflects increasing confidence in the cached frequency: First is the longest (an
/// unknown frequency deserves the most accurate estimate), Transition is medium, Periodic is the
/// short steady-state refresh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CalibrationTier {
    First,
    Transition,
    #[default]
    Periodic,
}

/// Required window duration per tier, in microseconds. Injectable through the engine config.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TierDurations {
    pub first_us: u64,
    pub transition_us: u64,
    pub periodic_us: u64,
}

impl TierDurations {
    pub fn required_us(&self, tier: CalibrationTier) -> u64 {
        match tier {
            CalibrationTier::First => self.first_us,
            CalibrationTier::Transition => self.transition_us,
            CalibrationTier::Periodic => self.periodic_us,
        }
    }
}

impl Default for TierDurations {
    fn default() -> Self {
        Self {
            first_us: 10_000,
            transition_us: 1_000,
            periodic_us: 250,
        }
    }
}

/// The currently open (or most recently closed) calibration window.
///
/// `stop` must be preceded by exactly one unmatched `start`; double-stopping double-counts the
/// interval and is a caller-discipline violation, not detected here.
#[derive(Debug, Default)]
pub struct CalibrationWindow {
    start_ticks: u64,
    start_time_us: u64,
    accumulated_ticks: u64,
    accumulated_time_us: u64,
    /// When set, the next `stop` adds to the existing accumulators instead of replacing them.
    /// Only valid while the frequency bucket is unchanged across the window boundary.
    merge_next: bool,
    tier: CalibrationTier,
    required_us: u64,
}

impl CalibrationWindow {
    /// Open a window at the given anchors and pick its duration tier.
    ///
    /// A bucket that has never been seen — or whose cached value still equals the uncalibrated
    /// nominal value — is (re)seeded with the nominal value and gets the First tier. A window
    /// immediately following a First-tier window gets Transition; anything else gets Periodic.
    /// Also moves the table's current-bucket cursor to the active nominal frequency.
    pub fn start(
        &mut self,
        ticks: u64,
        now_us: u64,
        nominal_hz: u32,
        dvfs: &mut DvfsFrequencyTable,
        tiers: &TierDurations,
    ) {
        self.start_ticks = ticks;
        self.start_time_us = now_us;

        let index = bucket_index(nominal_hz);
        let cached_hz = dvfs.hz(index);
        self.tier = if cached_hz == 0 || cached_hz == nominal_hz {
            dvfs.set_hz(index, nominal_hz);
            tracing::debug!(nominal_hz, "using uncalibrated GPU frequency");
            CalibrationTier::First
        } else if self.tier == CalibrationTier::First {
            CalibrationTier::Transition
        } else {
            CalibrationTier::Periodic
        };
        self.required_us = tiers.required_us(self.tier);

        dvfs.set_current(index);
    }

    /// Close the window, folding its deltas into the accumulators.
    ///
    /// Without the merge flag any stale accumulation is discarded first; with it the new interval
    /// extends the previous one(s). Tick and time reads are assumed monotonic non-decreasing, so
    /// the subtraction is wrapping rather than checked.
    pub fn stop(&mut self, ticks: u64, now_us: u64) {
        if !self.merge_next {
            self.accumulated_ticks = 0;
            self.accumulated_time_us = 0;
        }

        self.accumulated_ticks = self
            .accumulated_ticks
            .wrapping_add(ticks.wrapping_sub(self.start_ticks));
        self.accumulated_time_us = self
            .accumulated_time_us
            .wrapping_add(now_us.wrapping_sub(self.start_time_us));
    }

    pub fn set_merge(&mut self, merge: bool) {
        self.merge_next = merge;
    }

    pub fn tier(&self) -> CalibrationTier {
        self.tier
    }

    /// Accumulation (µs) the active tier asks for before the window is worth calibrating.
    pub fn required_us(&self) -> u64 {
        self.required_us
    }

    pub fn start_time_us(&self) -> u64 {
        self.start_time_us
    }

    pub fn accumulated_ticks(&self) -> u64 {
        self.accumulated_ticks
    }

    pub fn accumulated_time_us(&self) -> u64 {
        self.accumulated_time_us
    }

    /// Clear the deltas after a successful calibration so the same interval is never counted
    /// twice.
    pub fn reset_accumulators(&mut self) {
        self.accumulated_ticks = 0;
        self.accumulated_time_us = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const NOMINAL_HZ: u32 = 500_000_000;

    fn started_window(dvfs: &mut DvfsFrequencyTable) -> CalibrationWindow {
        let mut window = CalibrationWindow::default();
        window.start(0, 0, NOMINAL_HZ, dvfs, &TierDurations::default());
        window
    }

    #[test]
    fn first_encounter_selects_first_tier_and_seeds_the_bucket() {
        let mut dvfs = DvfsFrequencyTable::new();
        let window = started_window(&mut dvfs);

        assert_eq!(window.tier(), CalibrationTier::First);
        assert_eq!(window.required_us(), TierDurations::default().first_us);
        assert_eq!(dvfs.current_index(), bucket_index(NOMINAL_HZ));
        assert_eq!(dvfs.current_hz(), NOMINAL_HZ);
    }

    #[test]
    fn window_after_a_first_window_selects_transition_then_periodic() {
        let mut dvfs = DvfsFrequencyTable::new();
        let mut window = started_window(&mut dvfs);

        // A calibration landed away from the nominal guess, so the bucket now counts as seen.
        dvfs.set_current_hz(NOMINAL_HZ + 2_000_000);

        window.start(10, 10, NOMINAL_HZ, &mut dvfs, &TierDurations::default());
        assert_eq!(window.tier(), CalibrationTier::Transition);

        window.start(20, 20, NOMINAL_HZ, &mut dvfs, &TierDurations::default());
        assert_eq!(window.tier(), CalibrationTier::Periodic);
    }

    #[test]
    fn bucket_calibrated_back_to_its_nominal_value_counts_as_unseen() {
        let mut dvfs = DvfsFrequencyTable::new();
        let mut window = started_window(&mut dvfs);
        dvfs.set_current_hz(NOMINAL_HZ + 2_000_000);
        window.start(10, 10, NOMINAL_HZ, &mut dvfs, &TierDurations::default());
        assert_eq!(window.tier(), CalibrationTier::Transition);

        // A later calibration happens to land exactly on the nominal value again.
        dvfs.set_current_hz(NOMINAL_HZ);
        window.start(20, 20, NOMINAL_HZ, &mut dvfs, &TierDurations::default());
        assert_eq!(window.tier(), CalibrationTier::First);
    }

    #[test]
    fn fresh_stop_discards_stale_accumulation() {
        let mut dvfs = DvfsFrequencyTable::new();
        let mut window = started_window(&mut dvfs);

        window.stop(1_000, 70);
        assert_eq!(window.accumulated_ticks(), 1_000);
        assert_eq!(window.accumulated_time_us(), 70);

        window.start(5_000, 100, NOMINAL_HZ, &mut dvfs, &TierDurations::default());
        window.stop(5_300, 120);
        assert_eq!(window.accumulated_ticks(), 300);
        assert_eq!(window.accumulated_time_us(), 20);
    }

    #[test]
    fn merged_stop_extends_the_previous_window() {
        let mut dvfs = DvfsFrequencyTable::new();
        let mut window = started_window(&mut dvfs);

        window.stop(1_000, 70);
        window.set_merge(true);
        window.start(5_000, 100, NOMINAL_HZ, &mut dvfs, &TierDurations::default());
        window.stop(5_300, 120);

        assert_eq!(window.accumulated_ticks(), 1_300);
        assert_eq!(window.accumulated_time_us(), 90);
    }

    #[test]
    fn stop_survives_tick_counter_wraparound() {
        let mut dvfs = DvfsFrequencyTable::new();
        let mut window = CalibrationWindow::default();

        window.start(u64::MAX - 5, 0, NOMINAL_HZ, &mut dvfs, &TierDurations::default());
        window.stop(4, 10);
        assert_eq!(window.accumulated_ticks(), 10);
    }

    proptest! {
        /// Two merged windows accumulate exactly what a single uninterrupted window covering the
        /// same spans would.
        #[test]
        fn merged_windows_match_one_uninterrupted_window(
            t0 in 0u64..1 << 40,
            gap in 0u64..1 << 20,
            a_ticks in 0u64..1 << 40,
            b_ticks in 0u64..1 << 40,
            a_us in 0u64..1 << 20,
            b_us in 0u64..1 << 20,
        ) {
            let tiers = TierDurations::default();
            let mut dvfs = DvfsFrequencyTable::new();
            let mut merged = CalibrationWindow::default();
            merged.start(t0, t0, NOMINAL_HZ, &mut dvfs, &tiers);
            merged.stop(t0 + a_ticks, t0 + a_us);
            merged.set_merge(true);
            merged.start(t0 + a_ticks + gap, t0 + a_us + gap, NOMINAL_HZ, &mut dvfs, &tiers);
            merged.stop(t0 + a_ticks + gap + b_ticks, t0 + a_us + gap + b_us);

            let mut single = CalibrationWindow::default();
            single.start(t0, t0, NOMINAL_HZ, &mut dvfs, &tiers);
            single.stop(t0 + a_ticks + b_ticks, t0 + a_us + b_us);

            prop_assert_eq!(merged.accumulated_ticks(), single.accumulated_ticks());
            prop_assert_eq!(merged.accumulated_time_us(), single.accumulated_time_us());
        }
    }
}
