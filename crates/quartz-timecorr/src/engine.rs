//! The per-device correlation engine: transition coordination, record publishing and the
//! best-effort periodic trigger.
//!
//! Everything mutable (DVFS table, calibration window, mirrored power state) lives behind one
//! mutex — the device serialization lock. Power-transition and clock-change handlers take it
//! blocking; the periodic trigger only ever tries it and backs off, so periodic work can never
//! stall a power transition. The clock-source selection and the correlation ring are reachable
//! without the lock by design.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use quartz_clock::{now_us, ClockSource, ClockSourceCell, HostClock, InvalidClockSource};
use quartz_shared::{tick_to_ns_k, CorrelationRing, CorrelationUpdate};

use crate::calibrate;
use crate::dvfs::{bucket_index, DvfsFrequencyTable};
use crate::ticks::TickSource;
use crate::trace::TraceSink;
use crate::window::{CalibrationWindow, TierDurations};

/// Role of this driver instance. Guest instances of a virtualized driver do not own power
/// management, so every correlation entry point is a no-op for them (the host instance publishes
/// on behalf of all).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DriverRole {
    #[default]
    Host,
    Guest,
}

#[derive(Clone, Copy, Debug)]
pub struct TimeCorrConfig {
    pub role: DriverRole,
    /// Nominal core clock frequency (Hz) from the platform configuration.
    pub nominal_hz: u32,
    pub initial_source: ClockSource,
    pub tiers: TierDurations,
    /// Simulation builds have no real cycle counter to measure; calibration is skipped and the
    /// cached (nominal) values are trusted as-is.
    pub no_hardware: bool,
    /// Adds a monotonic host timestamp to every record, for workload estimation.
    pub workload_estimation: bool,
}

impl Default for TimeCorrConfig {
    fn default() -> Self {
        Self {
            role: DriverRole::Host,
            nominal_hz: 0,
            initial_source: ClockSource::default(),
            tiers: TierDurations::default(),
            no_hardware: false,
            workload_estimation: false,
        }
    }
}

/// State guarded by the device serialization lock.
struct CorrState {
    powered_on: bool,
    /// Active nominal frequency; updated by `post_clock_speed_change` before the new window
    /// opens so tier selection and bucket seeding see the new operating point.
    nominal_hz: u32,
    dvfs: DvfsFrequencyTable,
    window: CalibrationWindow,
}

/// The time-correlation engine of one device instance.
pub struct TimeCorr {
    cfg: TimeCorrConfig,
    source: ClockSourceCell,
    ring: Arc<CorrelationRing>,
    ticks: Arc<dyn TickSource>,
    clock: Arc<dyn HostClock>,
    trace: Arc<dyn TraceSink>,
    state: Mutex<CorrState>,
    /// Host time (µs) at which the periodic trigger next has work. Mirrored from the window
    /// anchors at every start so the elapsed check never needs the lock.
    next_due_us: AtomicU64,
}

impl TimeCorr {
    pub fn new(
        cfg: TimeCorrConfig,
        ticks: Arc<dyn TickSource>,
        clock: Arc<dyn HostClock>,
        trace: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            source: ClockSourceCell::new(cfg.initial_source),
            ring: Arc::new(CorrelationRing::new()),
            ticks,
            clock,
            trace,
            state: Mutex::new(CorrState {
                powered_on: false,
                nominal_hz: cfg.nominal_hz,
                dvfs: DvfsFrequencyTable::new(),
                window: CalibrationWindow::default(),
            }),
            next_due_us: AtomicU64::new(0),
            cfg,
        }
    }

    /// The correlation ring shared with external readers.
    pub fn ring(&self) -> Arc<CorrelationRing> {
        self.ring.clone()
    }

    /// Lock-free read of the active clock source.
    pub fn clock_source(&self) -> ClockSource {
        self.source.get()
    }

    /// Settings-surface get handler: the active clock source as a raw ordinal.
    pub fn clock_source_raw(&self) -> u32 {
        self.clock_source() as u32
    }

    /// Settings-surface set handler. Rejects out-of-range ordinals without touching any state.
    pub fn set_clock_source_raw(&self, raw: u32) -> Result<(), InvalidClockSource> {
        let source = ClockSource::from_raw(raw).map_err(|err| {
            tracing::error!(%err, "rejecting clock source change");
            err
        })?;
        self.set_clock_source(source);
        Ok(())
    }

    /// Change the clock source, re-anchoring correlation around the switch.
    ///
    /// Absolute timestamps taken under different sources are not comparable, so the current
    /// window is closed (and calibrated, if it accumulated enough) under the old source, and a
    /// fresh record is published unconditionally under the new one — even though the frequency
    /// bucket did not change.
    pub fn set_clock_source(&self, new: ClockSource) {
        if self.cfg.role == DriverRole::Guest {
            self.source.set(new);
            return;
        }

        let mut state = self.lock_state();

        self.stop_window(&mut state);
        self.maybe_calibrate(&mut state);

        let old = self.source.get();
        tracing::warn!(
            from = old.name(),
            to = new.name(),
            "switching time correlation clock source"
        );
        self.source.set(new);

        // The frequency is unchanged across the bracket, so the windows may merge; only the
        // host-time deltas matter and those are commensurable across sources.
        state.window.set_merge(true);
        self.start_window(&mut state);
        self.publish(&state, true);
    }

    /// Close the current window before the device powers down. No new window opens: the counter
    /// is about to stop ticking.
    pub fn pre_power_off(&self) {
        if self.cfg.role == DriverRole::Guest {
            return;
        }
        let mut state = self.lock_state();

        self.stop_window(&mut state);
        self.maybe_calibrate(&mut state);
        state.powered_on = false;
    }

    /// Open a window for the resumed device and re-correlate.
    ///
    /// The record is published without tracing: the trace sink re-emits equivalent scale
    /// information at its own partition boundary, and an event ahead of that marker would break
    /// the sink's framing.
    pub fn post_power_on(&self) {
        if self.cfg.role == DriverRole::Guest {
            return;
        }
        let mut state = self.lock_state();

        state.powered_on = true;
        // If the device resumes at the frequency it went down with, the interrupted window can
        // keep accumulating for a better estimate.
        let merge = bucket_index(state.nominal_hz) == state.dvfs.current_index();
        state.window.set_merge(merge);

        self.start_window(&mut state);
        self.publish(&state, false);
    }

    /// Close the current window ahead of a DVFS transition. Whether it is worth calibrating is
    /// only known once the new frequency is, so that decision is deferred to
    /// [`Self::post_clock_speed_change`].
    pub fn pre_clock_speed_change(&self) {
        if self.cfg.role == DriverRole::Guest {
            return;
        }
        let mut state = self.lock_state();
        self.stop_window(&mut state);
    }

    /// Complete a DVFS transition, returning the best-known frequency for the period that just
    /// ended (the new nominal value, unless the closed window was calibratable).
    ///
    /// A transition that stays inside the current bucket effectively did not happen: nothing is
    /// republished and the stopped window is flagged to merge with the next one.
    pub fn post_clock_speed_change(&self, new_hz: u32) -> u32 {
        if self.cfg.role == DriverRole::Guest {
            return new_hz;
        }
        let mut state = self.lock_state();
        let mut effective_hz = new_hz;

        if bucket_index(new_hz) != state.dvfs.current_index() {
            // Calibrate the closed window only if it accumulated enough to be trusted; a shorter
            // one is silently discarded (the fresh start below resets it).
            if state.window.accumulated_time_us() >= self.cfg.tiers.transition_us {
                effective_hz = self.calculate(&mut state);
            }

            state.nominal_hz = new_hz;
            state.window.set_merge(false);
            self.start_window(&mut state);
            self.publish(&state, true);
        } else {
            state.nominal_hz = new_hz;
            state.window.set_merge(true);
        }

        effective_hz
    }

    /// Best-effort periodic recorrelation entry point.
    ///
    /// Returns without any effect when the active tier duration has not elapsed (checked before
    /// any lock activity), when the device lock is contended, or when the device is off. On the
    /// happy path it recalibrates unconditionally — the steady-state refresh is the point.
    pub fn periodic_correlate(&self) {
        if self.cfg.role == DriverRole::Guest {
            return;
        }

        let time_now_us = now_us(self.clock.as_ref(), self.source.get());
        if time_now_us < self.next_due_us.load(Ordering::Relaxed) {
            return;
        }

        // Never stall the caller: a concurrent power transition wins.
        let Some(mut state) = self.try_lock_state() else {
            return;
        };
        if !state.powered_on {
            return;
        }

        self.stop_window(&mut state);
        self.calculate(&mut state);
        self.start_window(&mut state);
        self.publish(&state, true);
    }

    fn lock_state(&self) -> MutexGuard<'_, CorrState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_lock_state(&self) -> Option<MutexGuard<'_, CorrState>> {
        match self.state.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn now_us(&self) -> u64 {
        now_us(self.clock.as_ref(), self.source.get())
    }

    fn start_window(&self, state: &mut CorrState) {
        let ticks = self.ticks.read_ticks();
        let started_us = self.now_us();
        let nominal_hz = state.nominal_hz;
        state
            .window
            .start(ticks, started_us, nominal_hz, &mut state.dvfs, &self.cfg.tiers);

        self.next_due_us.store(
            started_us.wrapping_add(state.window.required_us()),
            Ordering::Relaxed,
        );
    }

    fn stop_window(&self, state: &mut CorrState) {
        let ticks = self.ticks.read_ticks();
        let stopped_us = self.now_us();
        state.window.stop(ticks, stopped_us);
    }

    fn maybe_calibrate(&self, state: &mut CorrState) {
        if state.window.accumulated_time_us() >= state.window.required_us() {
            self.calculate(state);
        }
    }

    /// Fold the accumulated deltas into a calibrated frequency for the active bucket.
    ///
    /// Returns the cached value untouched when there is nothing to measure: simulation builds,
    /// or a window with zero accumulated time (e.g. a repeated calculate without new
    /// accumulation).
    fn calculate(&self, state: &mut CorrState) -> u32 {
        let cached_hz = state.dvfs.current_hz();

        if self.cfg.no_hardware || state.window.accumulated_time_us() == 0 {
            return cached_hz;
        }

        let calibrated_hz = calibrate::frequency_hz(
            state.window.accumulated_ticks(),
            state.window.accumulated_time_us(),
        );
        tracing::debug!(
            from_hz = cached_hz,
            to_hz = calibrated_hz,
            over_us = state.window.accumulated_time_us(),
            "GPU frequency calibration"
        );

        state.dvfs.set_current_hz(calibrated_hz);
        state.window.reset_accumulators();
        calibrated_hz
    }

    /// Publish a correlation record for the current instant.
    fn publish(&self, state: &CorrState, log_to_trace: bool) {
        let core_clock_hz = state.dvfs.current_hz();

        let mono_time_ns = if self.cfg.workload_estimation {
            let mono = self.clock.mono_ns();
            if mono.is_none() {
                tracing::error!("monotonic clock unavailable, workload-estimation timestamp left empty");
            }
            mono
        } else {
            None
        };

        let tick_value = self.ticks.read_ticks();
        let host_time_ns = self.clock.now_ns(self.source.get());

        let sequence = self.ring.publish(CorrelationUpdate {
            tick_value,
            host_time_ns,
            mono_time_ns,
            core_clock_hz,
            tick_to_ns_k: tick_to_ns_k(core_clock_hz),
        });

        tracing::debug!(
            sequence,
            host_time_ns,
            tick_value,
            core_clock_hz,
            "published time correlation record"
        );

        if log_to_trace {
            self.trace.time_sync_scale(host_time_ns, tick_value, core_clock_hz);
        }
    }
}
