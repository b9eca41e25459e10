use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use pretty_assertions::assert_eq;
use quartz_clock::FakeHostClock;
use quartz_timecorr::{
    FakeTickSource, RecordingTraceSink, TickSource, TimeCorr, TimeCorrConfig,
};

fn engine_at(
    nominal_hz: u32,
) -> (
    TimeCorr,
    Arc<FakeTickSource>,
    Arc<FakeHostClock>,
    Arc<RecordingTraceSink>,
) {
    let ticks = Arc::new(FakeTickSource::new(0));
    let clock = Arc::new(FakeHostClock::new(0));
    let trace = Arc::new(RecordingTraceSink::new());
    let engine = TimeCorr::new(
        TimeCorrConfig {
            nominal_hz,
            ..Default::default()
        },
        ticks.clone(),
        clock.clone(),
        trace.clone(),
    );
    (engine, ticks, clock, trace)
}

#[test]
fn early_tick_is_a_complete_no_op() {
    let (engine, ticks, clock, trace) = engine_at(500_000_000);
    engine.post_power_on();
    let hardware_reads = ticks.reads();

    // 50 µs into a 10 ms First-tier window: way too early.
    clock.advance_us(50);
    engine.periodic_correlate();

    assert_eq!(engine.ring().sequence(), 1);
    assert_eq!(ticks.reads(), hardware_reads);
    assert!(trace.events().is_empty());
}

#[test]
fn due_tick_recalibrates_and_publishes() {
    let (engine, ticks, clock, trace) = engine_at(500_000_000);
    engine.post_power_on();

    clock.advance_us(20_000);
    ticks.advance(12_000_000);
    engine.periodic_correlate();

    let snap = engine.ring().snapshot();
    assert_eq!(snap.sequence, 2);
    // Periodic recalibration is unconditional: the measured 600 MHz replaces the nominal value.
    assert_eq!(snap.core_clock_hz, 600_000_000);
    assert_eq!(trace.events(), vec![(20_000_000, 12_000_000, 600_000_000)]);
}

#[test]
fn tick_while_powered_off_does_nothing() {
    let (engine, ticks, clock, _trace) = engine_at(500_000_000);
    engine.post_power_on();
    clock.advance_us(20_000);
    ticks.advance(12_000_000);
    engine.pre_power_off();

    clock.advance_us(20_000);
    engine.periodic_correlate();

    assert_eq!(engine.ring().sequence(), 1);
}

/// Tick source that, while armed, parks the calling thread inside a read — with the device lock
/// held — until the test releases it.
struct GateTickSource {
    armed: AtomicBool,
    entered_tx: Mutex<mpsc::Sender<()>>,
    release_rx: Mutex<mpsc::Receiver<()>>,
}

impl TickSource for GateTickSource {
    fn read_ticks(&self) -> u64 {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered_tx.lock().unwrap().send(()).unwrap();
            self.release_rx.lock().unwrap().recv().unwrap();
        }
        0
    }
}

#[test]
fn contended_lock_backs_off_instead_of_blocking() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Arc::new(GateTickSource {
        armed: AtomicBool::new(false),
        entered_tx: Mutex::new(entered_tx),
        release_rx: Mutex::new(release_rx),
    });
    let clock = Arc::new(FakeHostClock::new(0));
    let engine = Arc::new(TimeCorr::new(
        TimeCorrConfig {
            nominal_hz: 500_000_000,
            ..Default::default()
        },
        gate.clone(),
        clock.clone(),
        Arc::new(RecordingTraceSink::new()),
    ));

    engine.post_power_on();
    clock.advance_us(20_000);

    // Park a power transition inside the lock.
    gate.armed.store(true, Ordering::SeqCst);
    let transition = {
        let engine = engine.clone();
        thread::spawn(move || engine.pre_clock_speed_change())
    };
    entered_rx.recv().unwrap();

    // Due, but the lock is held: the trigger must return immediately without publishing.
    engine.periodic_correlate();
    assert_eq!(engine.ring().sequence(), 1);

    release_tx.send(()).unwrap();
    transition.join().unwrap();

    // With the lock free again the same trigger goes through.
    engine.post_clock_speed_change(500_000_000);
    engine.periodic_correlate();
    assert_eq!(engine.ring().sequence(), 2);
}
