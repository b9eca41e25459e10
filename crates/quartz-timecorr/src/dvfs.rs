//! Per-frequency-bucket cache of calibrated GPU clock values.
//!
//! Nominal operating points are grouped into 10 MHz buckets; each bucket remembers the best known
//! frequency for that point — the nominal value until a calibration window long enough to improve
//! on it has closed. A cached value of 0 means the bucket has never been seen.

/// Number of frequency buckets tracked by the table.
pub const DVFS_TABLE_LEN: usize = 32;

/// Bucket granularity in Hz.
pub const DVFS_BUCKET_STEP_HZ: u32 = 10_000_000;

/// Bucket index for a nominal frequency.
pub fn bucket_index(freq_hz: u32) -> usize {
    (freq_hz / DVFS_BUCKET_STEP_HZ) as usize % DVFS_TABLE_LEN
}

#[derive(Debug)]
pub struct DvfsFrequencyTable {
    clock_hz: [u32; DVFS_TABLE_LEN],
    current: usize,
}

impl DvfsFrequencyTable {
    pub fn new() -> Self {
        Self {
            clock_hz: [0; DVFS_TABLE_LEN],
            current: 0,
        }
    }

    /// Bucket matching the presently active nominal frequency.
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn set_current(&mut self, index: usize) {
        self.current = index;
    }

    /// Cached frequency of the given bucket; 0 = unseen.
    pub fn hz(&self, index: usize) -> u32 {
        self.clock_hz[index]
    }

    /// Cached frequency of the active bucket.
    pub fn current_hz(&self) -> u32 {
        self.clock_hz[self.current]
    }

    pub fn set_hz(&mut self, index: usize, hz: u32) {
        self.clock_hz[index] = hz;
    }

    /// Overwrite the active bucket with a calibrated value.
    pub fn set_current_hz(&mut self, hz: u32) {
        self.clock_hz[self.current] = hz;
    }
}

impl Default for DvfsFrequencyTable {
    fn default() -> Self {
        Self::new()
    }
}
