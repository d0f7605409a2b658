use std::fmt;

/// A simple type for genomic integer ranges
///
/// All ranges follow the bed file range convention: 0-indexed, half-closed, [start,end)
///
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct IntRange {
    pub start: i64,
    pub end: i64,
}

impl IntRange {
    pub fn from_pair(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Midpoint of the range, rounded down
    pub fn center(&self) -> i64 {
        (self.start + self.end) / 2
    }

    /// Return true if the ranges intersect (adjacency does not count)
    ///
    pub fn intersect_range(&self, other: &IntRange) -> bool {
        other.end > self.start && other.start < self.end
    }
}

impl fmt::Debug for IntRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}-{})", self.start, self.end)
    }
}
