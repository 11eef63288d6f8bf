use alloc::vec::Vec;
use core::ops::Range;

/// Upper bound on tracked intervals. Past it, the two closest intervals are fused, which only
/// ever widens the tracked set.
const MAX_INTERVALS: usize = 16;

/// Union-of-intervals accumulator over item indexes whose geometry must be recomputed.
///
/// The tracked set only grows until [`AffectedRange::take`] or [`AffectedRange::clear`] hands it
/// to a layout pass. Intervals are kept sorted, disjoint and non-adjacent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AffectedRange {
    intervals: Vec<Range<usize>>,
}

impl AffectedRange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Marks every index as affected.
    pub fn add_all(&mut self) {
        self.intervals.clear();
        self.intervals.push(0..usize::MAX);
    }

    pub fn is_all(&self) -> bool {
        matches!(self.intervals.as_slice(), [r] if r.start == 0 && r.end == usize::MAX)
    }

    pub fn add_index(&mut self, index: usize) {
        self.add(index..index.saturating_add(1));
    }

    /// Adds `range` to the set. Empty ranges are ignored.
    pub fn add(&mut self, range: Range<usize>) {
        if range.start >= range.end {
            return;
        }

        let mut merged = range;
        // First interval that ends at or after `merged.start` (adjacent counts as touching).
        let first = self
            .intervals
            .partition_point(|r| r.end < merged.start);
        let mut last = first;
        while last < self.intervals.len() && self.intervals[last].start <= merged.end {
            let r = &self.intervals[last];
            merged.start = merged.start.min(r.start);
            merged.end = merged.end.max(r.end);
            last += 1;
        }
        self.intervals.splice(first..last, core::iter::once(merged));

        if self.intervals.len() > MAX_INTERVALS {
            self.fuse_closest();
        }
    }

    fn fuse_closest(&mut self) {
        let Some(at) = (1..self.intervals.len())
            .min_by_key(|&i| self.intervals[i].start - self.intervals[i - 1].end)
        else {
            return;
        };
        let right = self.intervals.remove(at);
        self.intervals[at - 1].end = right.end;
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.intervals
    }

    /// Smallest single interval covering the whole set.
    pub fn envelope(&self) -> Option<Range<usize>> {
        let first = self.intervals.first()?;
        let last = self.intervals.last()?;
        Some(first.start..last.end)
    }

    pub fn contains(&self, index: usize) -> bool {
        let i = self.intervals.partition_point(|r| r.end <= index);
        self.intervals.get(i).is_some_and(|r| r.start <= index)
    }

    pub fn intersects(&self, range: Range<usize>) -> bool {
        if range.start >= range.end {
            return false;
        }
        let i = self.intervals.partition_point(|r| r.end <= range.start);
        self.intervals.get(i).is_some_and(|r| r.start < range.end)
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    /// Hands the accumulated set to the caller and leaves this accumulator empty.
    pub fn take(&mut self) -> Self {
        core::mem::take(self)
    }
}
