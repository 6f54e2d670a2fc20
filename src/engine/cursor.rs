//! Expected-sequence tracking.

use serde::Serialize;

/// Where the consumer believes the stream is.
///
/// `expected_index` counts samples drained since the stream started. It is a linear
/// index: the ring slot is derived from it by masking, and the sample value expected at
/// that index is `baseline + expected_index` (both wrapping at `u32`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SequenceCursor {
    expected_index: u32,
    last_observed: u32,
    baseline: u32,
    observed_any: bool,
}

impl SequenceCursor {
    /// Cursor for a stream whose first sample carries the value 0.
    pub const fn new() -> Self {
        Self::with_baseline(0)
    }

    /// Cursor for a stream whose first sample carries `baseline`.
    pub const fn with_baseline(baseline: u32) -> Self {
        Self {
            expected_index: 0,
            last_observed: 0,
            baseline,
            observed_any: false,
        }
    }

    /// Linear index of the next sample to drain.
    pub const fn expected_index(&self) -> u32 {
        self.expected_index
    }

    /// Value of the first sample of the stream.
    pub const fn baseline(&self) -> u32 {
        self.baseline
    }

    /// Last value actually read from the ring, if any.
    pub const fn last_observed(&self) -> Option<u32> {
        if self.observed_any {
            Some(self.last_observed)
        } else {
            None
        }
    }

    /// Sample value the producer should have written at `index`.
    #[inline]
    pub const fn expected_value(&self, index: u32) -> u32 {
        self.baseline.wrapping_add(index)
    }

    /// Value the most recently drained sample should carry.
    pub const fn expected_last(&self) -> u32 {
        self.expected_value(self.expected_index.wrapping_sub(1))
    }

    /// Record one drained sample and advance. Returns the index it was recorded at.
    #[inline]
    pub fn record(&mut self, observed: u32) -> u32 {
        let index = self.expected_index;
        self.last_observed = observed;
        self.observed_any = true;
        self.expected_index = index.wrapping_add(1);
        index
    }

    /// Continuity check: the last sample read equals the last sample expected.
    ///
    /// Trivially true before anything has been drained.
    #[inline]
    pub const fn is_continuous(&self) -> bool {
        !self.observed_any || self.last_observed == self.expected_last()
    }

    /// Stream position implied by the last sample read (`last - baseline + 1`).
    ///
    /// On an overrun this reflects how far the producer actually got, which is what the
    /// achieved-rate figure is computed from.
    pub const fn samples_observed(&self) -> u32 {
        if self.observed_any {
            self.last_observed
                .wrapping_sub(self.baseline)
                .wrapping_add(1)
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_baseline_tracks_values() {
        let mut cursor = SequenceCursor::new();
        assert!(cursor.is_continuous());
        assert_eq!(cursor.samples_observed(), 0);
        assert_eq!(cursor.last_observed(), None);

        for v in 0..10 {
            assert_eq!(cursor.record(v), v);
        }
        assert!(cursor.is_continuous());
        assert_eq!(cursor.expected_index(), 10);
        assert_eq!(cursor.expected_last(), 9);
        assert_eq!(cursor.samples_observed(), 10);
    }

    #[test]
    fn detects_skipped_value() {
        let mut cursor = SequenceCursor::new();
        cursor.record(0);
        cursor.record(4097);
        assert!(!cursor.is_continuous());
        assert_eq!(cursor.expected_last(), 1);
        assert_eq!(cursor.samples_observed(), 4098);
    }

    #[test]
    fn baseline_wraps_through_u32_max() {
        let baseline = u32::MAX - 2;
        let mut cursor = SequenceCursor::with_baseline(baseline);
        for i in 0..6u32 {
            cursor.record(baseline.wrapping_add(i));
            assert!(cursor.is_continuous(), "sample {i}");
        }
        assert_eq!(cursor.last_observed(), Some(2));
        assert_eq!(cursor.samples_observed(), 6);
    }
}
