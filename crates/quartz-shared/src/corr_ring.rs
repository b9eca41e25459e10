//! Lock-free time-correlation record ring shared with an external reader.
//!
//! The ring correlates a GPU cycle-counter value with a host timestamp and the GPU clock
//! frequency in effect at that instant. The driver core is the sole writer; the memory is also
//! mapped by firmware-side and host-side consumers that convert GPU timestamps to host time using
//! the latest record. Records are published with a sequence counter so a reader can detect (and
//! retry around) a concurrent update without ever taking a lock.

#[cfg(all(feature = "loom", test))]
use loom::sync::atomic::{fence, AtomicU32, AtomicU64};
#[cfg(not(all(feature = "loom", test)))]
use std::sync::atomic::{fence, AtomicU32, AtomicU64};

use std::sync::atomic::Ordering;

/// Number of record slots in the ring. Part of the layout contract with external readers.
pub const CORR_RECORD_COUNT: usize = 256;

/// Size of one record slot in bytes, including the reserved alignment word.
pub const CORR_SLOT_SIZE_BYTES: usize = 40;

/// Fixed-point shift of the tick-delta to nanosecond-delta conversion constant.
pub const TICK_TO_NS_SHIFT: u32 = 20;

/// Derive the fixed-point tick→ns conversion constant for a core clock frequency.
///
/// A tick delta multiplied by this constant and shifted right by [`TICK_TO_NS_SHIFT`] yields the
/// equivalent host-time delta in nanoseconds. Returns 0 for a zero frequency (nothing meaningful
/// can be converted; readers treat the record as unusable).
pub fn tick_to_ns_k(core_clock_hz: u32) -> u64 {
    if core_clock_hz == 0 {
        return 0;
    }
    ((1_000_000_000u128 << TICK_TO_NS_SHIFT) / u128::from(core_clock_hz)) as u64
}

/// One correlation record to publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CorrelationUpdate {
    /// GPU cycle-counter value sampled together with `host_time_ns`.
    pub tick_value: u64,
    /// Host time in nanoseconds, read from the currently selected clock source.
    pub host_time_ns: u64,
    /// Monotonic host time for workload estimation; `None` when the feature is disabled or the
    /// monotonic source is unavailable. The slot field is left at 0 in that case.
    pub mono_time_ns: Option<u64>,
    /// Core clock frequency (Hz) the tick counter was running at.
    pub core_clock_hz: u32,
    /// Fixed-point tick→ns constant derived from `core_clock_hz`; see [`tick_to_ns_k`].
    pub tick_to_ns_k: u64,
}

/// A coherent record read back from the ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CorrelationSnapshot {
    /// Sequence number the record was published under.
    pub sequence: u32,
    pub tick_value: u64,
    pub host_time_ns: u64,
    /// 0 when workload estimation is disabled.
    pub mono_time_ns: u64,
    pub core_clock_hz: u32,
    pub tick_to_ns_k: u64,
}

/// Field order is the external layout contract; `_reserved` keeps the 64-bit fields aligned.
#[repr(C)]
struct CorrelationSlot {
    tick_value: AtomicU64,
    host_time_ns: AtomicU64,
    mono_time_ns: AtomicU64,
    core_clock_hz: AtomicU32,
    _reserved: AtomicU32,
    tick_to_ns_k: AtomicU64,
}

impl CorrelationSlot {
    fn new() -> Self {
        Self {
            tick_value: AtomicU64::new(0),
            host_time_ns: AtomicU64::new(0),
            mono_time_ns: AtomicU64::new(0),
            core_clock_hz: AtomicU32::new(0),
            _reserved: AtomicU32::new(0),
            tick_to_ns_k: AtomicU64::new(0),
        }
    }
}

/// The shared correlation ring.
///
/// Publish protocol (single writer, running under the device serialization lock):
/// 1) Store every field of the slot selected by the *next* sequence value.
/// 2) `fence(Release)`.
/// 3) Store the new sequence value.
///
/// Snapshot protocol (any number of readers, lock-free):
/// 1) Load the sequence value, picking the slot it refers to.
/// 2) Load every field of that slot.
/// 3) `fence(Acquire)`, re-load the sequence value and retry if it moved.
///
/// The sequence advances exactly once per record, so a writer can only be touching the slot a
/// reader is looking at after a full ring wrap — which the re-validation in step 3 detects.
#[repr(C)]
pub struct CorrelationRing {
    sequence: AtomicU32,
    _reserved: AtomicU32,
    slots: [CorrelationSlot; CORR_RECORD_COUNT],
}

impl CorrelationRing {
    pub fn new() -> Self {
        Self {
            sequence: AtomicU32::new(0),
            _reserved: AtomicU32::new(0),
            slots: core::array::from_fn(|_| CorrelationSlot::new()),
        }
    }

    /// Latest published sequence value.
    pub fn sequence(&self) -> u32 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Publish a record into slot `new_sequence % CORR_RECORD_COUNT` and return the new sequence.
    ///
    /// Must only be called by the single writer, serialized by the device lock. The sequence
    /// counter is not advanced until every field of the record is written.
    pub fn publish(&self, update: CorrelationUpdate) -> u32 {
        let sequence = self.sequence.load(Ordering::Relaxed).wrapping_add(1);
        let slot = &self.slots[sequence as usize % CORR_RECORD_COUNT];

        slot.tick_value.store(update.tick_value, Ordering::Relaxed);
        test_yield();
        slot.host_time_ns
            .store(update.host_time_ns, Ordering::Relaxed);
        test_yield();
        slot.mono_time_ns
            .store(update.mono_time_ns.unwrap_or(0), Ordering::Relaxed);
        test_yield();
        slot.core_clock_hz
            .store(update.core_clock_hz, Ordering::Relaxed);
        test_yield();
        slot.tick_to_ns_k
            .store(update.tick_to_ns_k, Ordering::Relaxed);
        test_yield();

        // The record must be fully visible before the sequence value that claims it complete.
        fence(Ordering::Release);
        self.sequence.store(sequence, Ordering::Relaxed);
        sequence
    }

    /// Read the latest record, retrying until a coherent snapshot is obtained.
    pub fn snapshot(&self) -> CorrelationSnapshot {
        loop {
            let seq0 = self.sequence.load(Ordering::Acquire);
            let slot = &self.slots[seq0 as usize % CORR_RECORD_COUNT];

            let tick_value = slot.tick_value.load(Ordering::Relaxed);
            let host_time_ns = slot.host_time_ns.load(Ordering::Relaxed);
            let mono_time_ns = slot.mono_time_ns.load(Ordering::Relaxed);
            let core_clock_hz = slot.core_clock_hz.load(Ordering::Relaxed);
            let tick_to_ns_k = slot.tick_to_ns_k.load(Ordering::Relaxed);

            // Order the field loads before the re-validation of the sequence value.
            fence(Ordering::Acquire);
            if self.sequence.load(Ordering::Relaxed) == seq0 {
                return CorrelationSnapshot {
                    sequence: seq0,
                    tick_value,
                    host_time_ns,
                    mono_time_ns,
                    core_clock_hz,
                    tick_to_ns_k,
                };
            }
        }
    }
}

impl Default for CorrelationRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "loom"))]
#[inline]
fn test_yield() {
    loom::thread::yield_now();
}

#[cfg(all(test, not(feature = "loom")))]
#[inline]
fn test_yield() {
    std::thread::yield_now();
}

#[cfg(not(test))]
#[inline]
fn test_yield() {}
