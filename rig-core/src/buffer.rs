//! Bounded snapshot buffer.

use heapless::Vec;

/// Snapshots retained between flushes.
pub const SAMPLE_BUFFER_CAPACITY: usize = 200;

/// One sampling tick worth of readings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SensorSnapshot<TInstant> {
    pub timestamp: TInstant,
    /// Tare-corrected raw load cell value (0.0 when invalid).
    pub load_cell: f32,
    pub load_cell_valid: bool,
    pub bus_voltage_v: f32,
    pub bus_current_ma: f32,
    /// Normalized throttle in effect when the snapshot was taken.
    pub commanded: f32,
}

/// Result of offering a snapshot to the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Stored { len: usize },
    Dropped { total_dropped: u32 },
}

impl PushOutcome {
    #[must_use]
    pub const fn is_dropped(&self) -> bool {
        matches!(self, PushOutcome::Dropped { .. })
    }
}

/// Append-only buffer that drops new snapshots once full.
pub struct SampleBuffer<TInstant, const N: usize = SAMPLE_BUFFER_CAPACITY> {
    samples: Vec<SensorSnapshot<TInstant>, N>,
    dropped: u32,
}

impl<TInstant: Copy, const N: usize> SampleBuffer<TInstant, N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            samples: Vec::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, snapshot: SensorSnapshot<TInstant>) -> PushOutcome {
        match self.samples.push(snapshot) {
            Ok(()) => PushOutcome::Stored {
                len: self.samples.len(),
            },
            Err(_) => {
                self.dropped = self.dropped.saturating_add(1);
                PushOutcome::Dropped {
                    total_dropped: self.dropped,
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.is_full()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn as_slice(&self) -> &[SensorSnapshot<TInstant>] {
        &self.samples
    }

    /// Snapshots dropped since the last [`reset`](Self::reset).
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Empties the buffer; the drop counter is kept.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Empties the buffer and zeroes the drop counter.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.dropped = 0;
    }
}

impl<TInstant: Copy, const N: usize> Default for SampleBuffer<TInstant, N> {
    fn default() -> Self {
        Self::new()
    }
}
