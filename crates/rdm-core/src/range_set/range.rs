//! Inclusive byte range.

use std::cmp::Ordering;
use std::fmt;

/// Inclusive byte range `[start, end]` of the remote resource.
///
/// Ordered by `start`; two ranges are equal when both bounds match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub start: u64,
    pub end: u64,
}

impl Range {
    /// Panics in debug builds if `start > end`.
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "range start {} after end {}", start, end);
        Range { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl PartialOrd for Range {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Range {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .cmp(&other.start)
            .then_with(|| self.end.cmp(&other.end))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
