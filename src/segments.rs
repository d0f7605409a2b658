//! Conversion between bin-index breakpoints and genomic segments
//!

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::int_range::IntRange;

/// Chromosomes with this many bins or fewer are never subdivided
pub const MIN_SUBDIVIDE_BIN_COUNT: usize = 10;

/// Maximum distance in bases between a common CNV boundary and the bin boundary it is mapped to
pub const REMAP_DISTANCE_THRESHOLD: i64 = 10_000;

/// A genomic interval with homogeneous copy number
///
/// `start` is the start of the first bin in the segment, `end` is the (exclusive) end of its last bin.
///
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Segment {
    pub start: i64,
    pub end: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChromSegments {
    pub chrom: String,
    pub segments: Vec<Segment>,
}

/// Segments of all chromosomes, in input chromosome order
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct GenomeSegments {
    pub chroms: Vec<ChromSegments>,
}

impl GenomeSegments {
    pub fn segment_count(&self) -> usize {
        self.chroms.iter().map(|x| x.segments.len()).sum()
    }
}

/// A common CNV interval mapped into bin index space, covering bins `[start, end)`
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BinInterval {
    pub start: usize,
    pub end: usize,
}

/// Convert breakpoints into segments covering all bins without gaps or overlaps
///
/// Each breakpoint is the index of the first bin of a new segment. Breakpoint 0 is implied, and
/// breakpoints outside of `(0, bin_count)` are ignored.
///
pub fn derive_segments(
    breakpoints: &[usize],
    bin_count: usize,
    start: &[i64],
    end: &[i64],
) -> Vec<Segment> {
    assert!(bin_count <= start.len() && bin_count <= end.len());

    if bin_count < 1 {
        return Vec::new();
    }

    if breakpoints.len() < 2 || bin_count <= MIN_SUBDIVIDE_BIN_COUNT {
        return vec![Segment {
            start: start[0],
            end: end[bin_count - 1],
        }];
    }

    let mut interior = breakpoints
        .iter()
        .copied()
        .filter(|&x| x > 0 && x < bin_count)
        .collect::<Vec<_>>();
    interior.sort_unstable();
    interior.dedup();

    std::iter::once(0)
        .chain(interior)
        .chain(std::iter::once(bin_count))
        .tuple_windows()
        .map(|(first_bin, next_first_bin)| Segment {
            start: start[first_bin],
            end: end[next_first_bin - 1],
        })
        .collect()
}

/// Find the index of the coordinate nearest `value`, searching forward from `cursor`
///
/// `coords` must be sorted. The cursor is left at the nearest coordinate so that a sorted series
/// of queries is answered in a single pass. Returns None when the nearest coordinate is further
/// than the remap distance threshold.
///
fn remap_index(coords: &[i64], value: i64, cursor: &mut usize) -> Option<usize> {
    if *cursor >= coords.len() {
        return None;
    }
    let dist = |i: usize| (coords[i] - value).abs();
    let mut nearest = *cursor;
    while nearest + 1 < coords.len() && dist(nearest + 1) <= dist(nearest) {
        nearest += 1;
    }
    *cursor = nearest;
    if dist(nearest) < REMAP_DISTANCE_THRESHOLD {
        Some(nearest)
    } else {
        None
    }
}

/// Map sorted, non-overlapping genomic intervals onto bin index space
///
/// An interval start maps to the bin whose start is nearest, an interval end maps to the bin
/// whose end is nearest. Intervals with either boundary beyond the distance threshold are dropped.
///
pub fn remap_common_regions(intervals: &[IntRange], start: &[i64], end: &[i64]) -> Vec<BinInterval> {
    let mut cursor = 0;
    let mut bin_intervals = Vec::new();
    for interval in intervals.iter() {
        let Some(start_index) = remap_index(start, interval.start, &mut cursor) else {
            continue;
        };
        let Some(end_index) = remap_index(end, interval.end, &mut cursor) else {
            continue;
        };
        if end_index < start_index {
            continue;
        }
        bin_intervals.push(BinInterval {
            start: start_index,
            end: end_index + 1,
        });
    }
    bin_intervals
}

/// Force breakpoints at the boundaries of all common CNV intervals
///
/// Breakpoints falling strictly inside a common CNV interval are replaced by the interval
/// boundaries, all other breakpoints are kept. Both inputs must be sorted. The output is sorted
/// and free of duplicates.
///
pub fn overlap_common_regions(breakpoints: &[usize], intervals: &[BinInterval]) -> Vec<usize> {
    let mut merged = Vec::with_capacity(breakpoints.len() + intervals.len() * 2);
    let mut intervals = intervals.iter().peekable();

    for &breakpoint in breakpoints.iter() {
        let mut is_inside_interval = false;
        while let Some(interval) = intervals.next_if(|x| breakpoint > x.start) {
            merged.push(interval.start);
            merged.push(interval.end);
            if breakpoint < interval.end {
                is_inside_interval = true;
                break;
            }
        }
        if !is_inside_interval {
            merged.push(breakpoint);
        }
    }

    for interval in intervals {
        merged.push(interval.start);
        merged.push(interval.end);
    }

    merged.sort_unstable();
    merged.dedup();
    merged
}

/// Breakpoints at every position where the per-bin call changes, starting with 0
///
pub fn get_call_change_breakpoints<T: PartialEq>(calls: &[T]) -> Vec<usize> {
    if calls.is_empty() {
        return Vec::new();
    }
    std::iter::once(0)
        .chain(
            calls
                .iter()
                .tuple_windows()
                .positions(|(a, b)| a != b)
                .map(|x| x + 1),
        )
        .collect()
}

/// Merge segment lists from multiple samples over the same chromosome
///
/// The result is split at every segment boundary found in any sample.
///
pub fn split_overlapping_segments(sample_segments: &[Vec<Segment>]) -> Vec<Segment> {
    // Sort ends ahead of starts at the same position
    let mut positions = sample_segments
        .iter()
        .flatten()
        .flat_map(|x| [(x.start, true), (x.end, false)])
        .collect::<Vec<_>>();
    positions.sort_unstable();

    let mut merged = Vec::new();
    let mut overlap_count = 0i64;
    let mut current = 0;
    for (pos, is_start) in positions {
        if overlap_count > 0 && pos != current {
            merged.push(Segment {
                start: current,
                end: pos,
            });
        }
        current = pos;
        overlap_count += if is_start { 1 } else { -1 };
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_bins(bin_count: usize, bin_size: i64) -> (Vec<i64>, Vec<i64>) {
        let start = (0..bin_count as i64).map(|x| x * bin_size).collect::<Vec<_>>();
        let end = start.iter().map(|x| x + bin_size).collect::<Vec<_>>();
        (start, end)
    }

    fn assert_covers_bins(segments: &[Segment], start: &[i64], end: &[i64]) {
        assert_eq!(segments.first().unwrap().start, start[0]);
        assert_eq!(segments.last().unwrap().end, *end.last().unwrap());
        for (a, b) in segments.iter().tuple_windows() {
            assert_eq!(a.end, b.start);
            assert!(a.start < a.end);
        }
    }

    #[test]
    fn test_derive_segments() {
        let (start, end) = get_test_bins(20, 100);
        let segments = derive_segments(&[0, 5, 12], 20, &start, &end);
        assert_eq!(
            segments,
            vec![
                Segment { start: 0, end: 500 },
                Segment { start: 500, end: 1200 },
                Segment { start: 1200, end: 2000 },
            ]
        );
        assert_covers_bins(&segments, &start, &end);
    }

    #[test]
    fn test_derive_segments_short_chrom() {
        let (start, end) = get_test_bins(3, 100);
        let segments = derive_segments(&[0, 1, 2], 3, &start, &end);
        assert_eq!(segments, vec![Segment { start: 0, end: 300 }]);

        assert!(derive_segments(&[0], 0, &start, &end).is_empty());

        let (start, end) = get_test_bins(30, 100);
        let segments = derive_segments(&[0], 30, &start, &end);
        assert_eq!(segments, vec![Segment { start: 0, end: 3000 }]);
    }

    #[test]
    fn test_derive_segments_with_gaps() {
        // Bin gaps are absorbed into the segment ending before the gap
        let start = (0..12).map(|x| x * 200).collect::<Vec<i64>>();
        let end = start.iter().map(|x| x + 100).collect::<Vec<_>>();
        let segments = derive_segments(&[0, 6, 6, 40], 12, &start, &end);
        assert_eq!(
            segments,
            vec![
                Segment { start: 0, end: 1100 },
                Segment { start: 1200, end: 2300 },
            ]
        );
    }

    #[test]
    fn test_remap_common_regions() {
        let (start, end) = get_test_bins(100, 1000);
        let intervals = [
            IntRange::from_pair(10_500, 20_500),
            IntRange::from_pair(40_000, 45_000),
            IntRange::from_pair(500_000, 600_000),
        ];
        let bin_intervals = remap_common_regions(&intervals, &start, &end);
        assert_eq!(
            bin_intervals,
            vec![
                BinInterval { start: 11, end: 21 },
                BinInterval { start: 40, end: 45 },
            ]
        );

        // Reverse lookup recovers the genomic intervals within the distance threshold
        for (bin_interval, interval) in bin_intervals.iter().zip(intervals.iter()) {
            assert!((start[bin_interval.start] - interval.start).abs() < REMAP_DISTANCE_THRESHOLD);
            assert!((end[bin_interval.end - 1] - interval.end).abs() < REMAP_DISTANCE_THRESHOLD);
        }
    }

    #[test]
    fn test_overlap_common_regions_forcing() {
        // A common CNV inside a single segment splits it into three
        let merged = overlap_common_regions(&[0, 50], &[BinInterval { start: 10, end: 20 }]);
        assert_eq!(merged, vec![0, 10, 20, 50]);

        let (start, end) = get_test_bins(100, 100);
        let segments = derive_segments(&[0, 10, 20], 100, &start, &end);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1], Segment { start: 1000, end: 2000 });
    }

    #[test]
    fn test_overlap_common_regions_replacement() {
        let intervals = [
            BinInterval { start: 10, end: 20 },
            BinInterval { start: 30, end: 40 },
        ];

        // 15 is inside the first interval and is replaced, 30 is on a boundary and kept
        let merged = overlap_common_regions(&[0, 15, 30, 60], &intervals);
        assert_eq!(merged, vec![0, 10, 20, 30, 40, 60]);

        // Intervals after the final breakpoint are still enforced
        let merged = overlap_common_regions(&[0], &intervals);
        assert_eq!(merged, vec![0, 10, 20, 30, 40]);

        // Breakpoints after the final interval are kept
        let merged = overlap_common_regions(&[0, 35, 70, 80], &intervals);
        assert_eq!(merged, vec![0, 10, 20, 30, 40, 70, 80]);
    }

    #[test]
    fn test_get_call_change_breakpoints() {
        assert_eq!(get_call_change_breakpoints(&[1, 1, 2, 2, 2, 1]), vec![0, 2, 5]);
        assert_eq!(get_call_change_breakpoints(&[3, 3, 3]), vec![0]);
        assert!(get_call_change_breakpoints::<u8>(&[]).is_empty());
    }

    #[test]
    fn test_split_overlapping_segments() {
        let a = vec![Segment { start: 0, end: 100 }, Segment { start: 100, end: 300 }];
        let b = vec![Segment { start: 0, end: 200 }, Segment { start: 200, end: 300 }];
        let merged = split_overlapping_segments(&[a.clone(), b]);
        assert_eq!(
            merged,
            vec![
                Segment { start: 0, end: 100 },
                Segment { start: 100, end: 200 },
                Segment { start: 200, end: 300 },
            ]
        );

        assert_eq!(split_overlapping_segments(&[a.clone()]), a);
        assert!(split_overlapping_segments(&[]).is_empty());
    }
}
