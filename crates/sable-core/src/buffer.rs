//! Buffer management for video playback
//!
//! Tracks the time ranges the render layer reports as decodable:
//! - Ordered, non-overlapping range set with merge on insert
//! - Buffer-ahead metrics for start/rebuffer thresholds
//! - Back-buffer eviction for long-running live sessions

use crate::types::BufferRange;
use tracing::{debug, trace};

/// Ordered set of buffered time ranges for one session
#[derive(Debug, Clone, Default)]
pub struct BufferManager {
    /// Sorted by start, pairwise disjoint
    ranges: Vec<BufferRange>,
}

impl BufferManager {
    /// Create an empty buffer manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `[start, end]` into the range set.
    ///
    /// Returns false when the input is degenerate (non-finite, or `end <= start`)
    /// and nothing changed.
    pub fn add_range(&mut self, start: f64, end: f64) -> bool {
        if !start.is_finite() || !end.is_finite() || end <= start {
            debug!(start, end, "Ignoring invalid buffer range");
            return false;
        }

        // First range whose end reaches the new start (touching counts)
        let first = self
            .ranges
            .partition_point(|r| r.end < start);
        // One past the last range whose start is reached by the new end
        let last = self
            .ranges
            .partition_point(|r| r.start <= end);

        let mut merged = BufferRange::new(start, end);
        if first < last {
            merged.start = merged.start.min(self.ranges[first].start);
            merged.end = merged.end.max(self.ranges[last - 1].end);
        }
        self.ranges.splice(first..last, std::iter::once(merged));

        trace!(start, end, ranges = self.ranges.len(), "Buffer range added");
        true
    }

    /// Drop media before `before_time`, truncating a range that straddles it.
    ///
    /// Returns true if anything was removed.
    pub fn evict(&mut self, before_time: f64) -> bool {
        let mut changed = false;
        self.ranges.retain_mut(|r| {
            if r.end <= before_time {
                changed = true;
                false
            } else {
                if r.start < before_time {
                    r.start = before_time;
                    changed = true;
                }
                true
            }
        });
        if changed {
            debug!(before_time, ranges = self.ranges.len(), "Evicted back buffer");
        }
        changed
    }

    /// Extent from `position` to the end of the range containing it, or of the
    /// next range when `position` sits in a gap. Zero when nothing is ahead.
    pub fn buffer_duration(&self, position: f64) -> f64 {
        let idx = self.ranges.partition_point(|r| r.end < position);
        match self.ranges.get(idx) {
            Some(range) => (range.end - position).max(0.0),
            None => 0.0,
        }
    }

    /// The range containing `position`, or an empty range
    pub fn buffered_range(&self, position: f64) -> BufferRange {
        self.containing(position).unwrap_or(BufferRange::EMPTY)
    }

    /// Playable media ahead of `position`: zero unless a range contains it
    pub fn playable_ahead(&self, position: f64) -> f64 {
        self.containing(position)
            .map(|r| (r.end - position).max(0.0))
            .unwrap_or(0.0)
    }

    /// True if `time` lies inside a buffered range
    pub fn covers(&self, time: f64) -> bool {
        self.containing(time).is_some()
    }

    fn containing(&self, position: f64) -> Option<BufferRange> {
        let idx = self.ranges.partition_point(|r| r.end < position);
        self.ranges
            .get(idx)
            .copied()
            .filter(|r| r.contains(position))
    }

    /// All ranges in order
    pub fn ranges(&self) -> &[BufferRange] {
        &self.ranges
    }

    /// Sum of all range durations
    pub fn total_buffered(&self) -> f64 {
        self.ranges.iter().map(BufferRange::duration).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Drop every range
    pub fn clear(&mut self) {
        self.ranges.clear();
        debug!("Buffer cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn assert_sorted_disjoint(buffer: &BufferManager) {
        for r in buffer.ranges() {
            assert!(r.start <= r.end, "inverted range {r:?}");
        }
        for pair in buffer.ranges().windows(2) {
            assert!(pair[0].end < pair[1].start, "overlap {:?}", pair);
        }
    }

    #[test]
    fn test_add_disjoint_ranges_sorted() {
        let mut buffer = BufferManager::new();
        buffer.add_range(10.0, 14.0);
        buffer.add_range(0.0, 4.0);
        buffer.add_range(20.0, 24.0);

        assert_eq!(
            buffer.ranges(),
            &[
                BufferRange::new(0.0, 4.0),
                BufferRange::new(10.0, 14.0),
                BufferRange::new(20.0, 24.0)
            ]
        );
    }

    #[rstest]
    #[case::touching(vec![(0.0, 4.0), (4.0, 8.0)], vec![(0.0, 8.0)])]
    #[case::overlapping(vec![(0.0, 5.0), (3.0, 8.0)], vec![(0.0, 8.0)])]
    #[case::contained(vec![(0.0, 10.0), (2.0, 3.0)], vec![(0.0, 10.0)])]
    #[case::bridging(vec![(0.0, 2.0), (6.0, 8.0), (1.0, 7.0)], vec![(0.0, 8.0)])]
    #[case::swallow_many(vec![(1.0, 2.0), (3.0, 4.0), (5.0, 6.0), (0.0, 10.0)], vec![(0.0, 10.0)])]
    #[case::gap_kept(vec![(0.0, 2.0), (2.5, 4.0)], vec![(0.0, 2.0), (2.5, 4.0)])]
    #[case::narrow_gap_kept(vec![(0.0, 1.0), (1.005, 2.0)], vec![(0.0, 1.0), (1.005, 2.0)])]
    fn test_merge(#[case] inputs: Vec<(f64, f64)>, #[case] expected: Vec<(f64, f64)>) {
        let mut buffer = BufferManager::new();
        for (s, e) in inputs {
            buffer.add_range(s, e);
        }
        let expected: Vec<_> = expected.into_iter().map(|(s, e)| BufferRange::new(s, e)).collect();
        assert_eq!(buffer.ranges(), expected.as_slice());
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        let mut buffer = BufferManager::new();
        assert!(!buffer.add_range(5.0, 4.0));
        assert!(!buffer.add_range(4.0, 4.0));
        assert!(!buffer.add_range(f64::NAN, 4.0));
        assert!(!buffer.add_range(0.0, f64::INFINITY));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_random_sequences_keep_invariants() {
        // Deterministic LCG so failures reproduce
        let mut seed: u64 = 0x5eed;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as f64 / (1u64 << 31) as f64
        };

        for _ in 0..50 {
            let mut buffer = BufferManager::new();
            let mut coverage = vec![false; 1000];
            for _ in 0..40 {
                let start = (next() * 90.0).floor();
                let len = (next() * 10.0).floor();
                buffer.add_range(start, start + len);
                for slot in (start * 10.0) as usize..((start + len) * 10.0) as usize {
                    coverage[slot] = true;
                }
                assert_sorted_disjoint(&buffer);
            }
            let expected: f64 = coverage.iter().filter(|c| **c).count() as f64 / 10.0;
            assert!((buffer.total_buffered() - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_fractional_gaps_keep_union_coverage() {
        let mut buffer = BufferManager::new();
        buffer.add_range(0.0, 1.0);
        buffer.add_range(1.005, 2.0);
        buffer.add_range(2.0001, 3.5);
        assert_sorted_disjoint(&buffer);
        assert_eq!(buffer.ranges().len(), 3);
        assert!((buffer.total_buffered() - 3.4949).abs() < 1e-9);
        assert!(!buffer.covers(1.002));
        assert_eq!(buffer.playable_ahead(0.5), 0.5);
    }

    #[rstest]
    #[case::inside(5.0, 5.0)]
    #[case::at_start(0.0, 10.0)]
    #[case::at_end(10.0, 0.0)]
    #[case::in_gap(12.0, 8.0)]
    #[case::past_everything(25.0, 0.0)]
    fn test_buffer_duration(#[case] position: f64, #[case] expected: f64) {
        let mut buffer = BufferManager::new();
        buffer.add_range(0.0, 10.0);
        buffer.add_range(15.0, 20.0);
        assert!((buffer.buffer_duration(position) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_buffer_duration_empty() {
        let buffer = BufferManager::new();
        assert_eq!(buffer.buffer_duration(0.0), 0.0);
        assert_eq!(buffer.buffered_range(3.0), BufferRange::EMPTY);
    }

    #[test]
    fn test_buffered_range_and_playable_ahead() {
        let mut buffer = BufferManager::new();
        buffer.add_range(0.0, 10.0);
        buffer.add_range(15.0, 20.0);

        assert_eq!(buffer.buffered_range(16.0), BufferRange::new(15.0, 20.0));
        assert_eq!(buffer.buffered_range(12.0), BufferRange::EMPTY);
        assert_eq!(buffer.playable_ahead(12.0), 0.0);
        assert_eq!(buffer.playable_ahead(16.0), 4.0);
        assert!(buffer.covers(10.0));
        assert!(!buffer.covers(10.5));
    }

    #[test]
    fn test_evict_truncates_and_drops() {
        let mut buffer = BufferManager::new();
        buffer.add_range(0.0, 10.0);
        buffer.add_range(15.0, 20.0);

        assert!(buffer.evict(5.0));
        assert_eq!(buffer.ranges()[0], BufferRange::new(5.0, 10.0));

        assert!(buffer.evict(16.0));
        assert_eq!(buffer.ranges(), &[BufferRange::new(16.0, 20.0)]);

        assert!(!buffer.evict(1.0));
        assert!(buffer.evict(30.0));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_total_buffered() {
        let mut buffer = BufferManager::new();
        buffer.add_range(0.0, 4.0);
        buffer.add_range(8.0, 12.0);
        assert_eq!(buffer.total_buffered(), 8.0);
        assert_eq!(buffer.ranges().len(), 2);
    }
}
