//! Outbound correlation events to the external trace sink.

use std::sync::Mutex;

/// Receives the correlated (host time, tick value, frequency) triple whenever a record is
/// published with tracing enabled. The sink owns its own framing; the engine deliberately skips
/// it right after power-on (see the engine's publish path).
pub trait TraceSink: Send + Sync {
    fn time_sync_scale(&self, host_time_ns: u64, tick_value: u64, core_clock_hz: u32);
}

/// Discards every event.
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn time_sync_scale(&self, _host_time_ns: u64, _tick_value: u64, _core_clock_hz: u32) {}
}

/// Test sink capturing every event in order.
#[derive(Default)]
pub struct RecordingTraceSink {
    events: Mutex<Vec<(u64, u64, u32)>>,
}

impl RecordingTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(host_time_ns, tick_value, core_clock_hz)` events seen so far.
    pub fn events(&self) -> Vec<(u64, u64, u32)> {
        self.events.lock().unwrap().clone()
    }
}

impl TraceSink for RecordingTraceSink {
    fn time_sync_scale(&self, host_time_ns: u64, tick_value: u64, core_clock_hz: u32) {
        self.events
            .lock()
            .unwrap()
            .push((host_time_ns, tick_value, core_clock_hz));
    }
}
