//! State shared between the Quartz driver core and external readers.

mod corr_ring;

pub use corr_ring::{
    tick_to_ns_k, CorrelationRing, CorrelationSnapshot, CorrelationUpdate, CORR_RECORD_COUNT,
    CORR_SLOT_SIZE_BYTES, TICK_TO_NS_SHIFT,
};
