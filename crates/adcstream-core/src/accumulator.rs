//! Per-channel streaming statistics
//!
//! A [`ChannelAccumulator`] keeps the raw values a channel produced during one
//! reporting cycle together with their running minimum, maximum and range.
//! The buffer is bounded: once it is full, further samples in the same cycle
//! are dropped without error.

use serde::{Deserialize, Serialize};

/// Default number of samples retained per channel and cycle
///
/// Half of the 512-byte batch the drain loop reads per iteration.
pub const SAMPLES_PER_CHANNEL: usize = 256;

/// Minimum, maximum and range of the samples recorded in one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub min: u16,
    pub max: u16,
    pub range: u16,
}

impl ChannelStats {
    /// Statistics of a channel that has never been written
    pub const UNWRITTEN: Self = Self {
        min: u16::MAX,
        max: 0,
        range: 0,
    };
}

/// Bounded min/max/range accumulator for a single ADC channel
///
/// `N` is the number of samples retained per cycle. The fill index is the
/// length of the internal buffer and never exceeds `N`.
///
/// ```rust
/// use adcstream_core::accumulator::{ChannelAccumulator, ChannelStats};
///
/// let mut acc = ChannelAccumulator::<256>::new();
/// for value in [10, 5000, 3, 42] {
///     acc.record(value);
/// }
/// assert_eq!(acc.report(), ChannelStats { min: 3, max: 5000, range: 4997 });
/// ```
#[derive(Debug, Clone)]
pub struct ChannelAccumulator<const N: usize = SAMPLES_PER_CHANNEL> {
    samples: heapless::Vec<u16, N>,
    min: u16,
    max: u16,
    range: u16,
}

impl<const N: usize> Default for ChannelAccumulator<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ChannelAccumulator<N> {
    pub const fn new() -> Self {
        Self {
            samples: heapless::Vec::new(),
            min: ChannelStats::UNWRITTEN.min,
            max: ChannelStats::UNWRITTEN.max,
            range: ChannelStats::UNWRITTEN.range,
        }
    }

    /// Start a new cycle.
    ///
    /// Only the fill index is cleared. Min and max are re-initialized lazily
    /// by the first [`record`](Self::record) of the next cycle.
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// Record one raw sample.
    ///
    /// Returns `false` when the cycle already holds `N` samples, in which case
    /// the sample is dropped and nothing changes.
    pub fn record(&mut self, value: u16) -> bool {
        if self.samples.is_empty() {
            self.min = u16::MAX;
            self.max = 0;
        }

        if self.samples.push(value).is_err() {
            return false;
        }

        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.range = self.max - self.min;
        true
    }

    /// Current statistics. Pure read.
    pub fn report(&self) -> ChannelStats {
        ChannelStats {
            min: self.min,
            max: self.max,
            range: self.range,
        }
    }

    /// Samples recorded in the current cycle, in arrival order
    pub fn samples(&self) -> &[u16] {
        &self.samples
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
}
