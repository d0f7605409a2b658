//! Removal of weakly supported change points after binary segmentation
//!
//! Change points are represented as exclusive segment end indices, with the final entry equal to
//! the data length.
//!

use itertools::Itertools;

use crate::stats_utils::median;

/// Sum over merged segment groups of (group sum)^2 / (group length)
///
/// `locations` holds the 1-based segment indices after which a change point is retained.
///
fn explained_sum_of_squares(lengths: &[usize], sums: &[f64], locations: &[usize]) -> f64 {
    let group_ess = |group: std::ops::Range<usize>| {
        let sum = sums[group.clone()].iter().sum::<f64>();
        let len = lengths[group].iter().sum::<usize>();
        sum * sum / len as f64
    };

    let segment_count = lengths.len();
    std::iter::once(0)
        .chain(locations.iter().copied())
        .chain(std::iter::once(segment_count))
        .tuple_windows()
        .map(|(start, end)| group_ess(start..end))
        .sum()
}

/// Advance `loc` to the next combination of `r` sorted values from `1..=r+nmr`
///
/// Returns false once the final combination has been reached.
///
fn next_combination(r: usize, nmr: usize, loc: &mut [usize]) -> bool {
    let mut i = r - 1;
    while loc[i] == nmr + i + 1 {
        i -= 1;
    }
    loc[i] += 1;
    for j in (i + 1)..r {
        loc[j] = loc[j - 1] + 1;
    }
    loc[0] != nmr + 1
}

/// Reduce the change point count to the smallest one whose best configuration explains the data
/// nearly as well as the full set
///
/// For each change point count `j`, all subsets of `j` change points are evaluated, and the count
/// is accepted when the increase in within-segment sum of squares relative to the full set stays
/// within `cutoff`.
///
pub fn prune_change_points(data: &[f64], segment_ends: &[usize], cutoff: f64) -> Vec<usize> {
    let n = data.len();
    let starts = std::iter::once(0).chain(segment_ends.iter().copied());
    let lengths = starts
        .clone()
        .zip(segment_ends.iter())
        .map(|(start, &end)| end - start)
        .collect::<Vec<_>>();
    let sums = starts
        .zip(segment_ends.iter())
        .map(|(start, &end)| data[start..end].iter().sum::<f64>())
        .collect::<Vec<_>>();

    let change_point_count = lengths.len() - 1;
    if change_point_count == 0 {
        return segment_ends.to_vec();
    }

    let ssq = data.iter().map(|x| x * x).sum::<f64>();
    let full_locations = (1..=change_point_count).collect::<Vec<_>>();
    let wssqk = ssq - explained_sum_of_squares(&lengths, &sums, &full_locations);
    let is_worse = |wssq: f64| wssq / wssqk > 1.0 + cutoff;

    let mut is_count_rejected = false;
    let mut prev_best = full_locations;
    for j in (1..change_point_count).rev() {
        let kmj = change_point_count - j;
        let mut loc = (1..=j).collect::<Vec<_>>();
        let mut best = loc.clone();
        let mut wssqj = ssq - explained_sum_of_squares(&lengths, &sums, &loc);
        let mut is_left = true;
        while is_left {
            is_left = next_combination(j, kmj, &mut loc);
            let wssq1 = ssq - explained_sum_of_squares(&lengths, &sums, &loc);
            if wssq1 <= wssqj {
                wssqj = wssq1;
                best.copy_from_slice(&loc);
            }
        }
        if is_worse(wssqj) {
            is_count_rejected = true;
            break;
        }
        prev_best = best;
    }

    // If all counts down to one were accepted, test removal of the final change point
    let kept_locations = if is_count_rejected {
        prev_best
    } else {
        let total = sums.iter().sum::<f64>();
        let wssq0 = ssq - total * total / n as f64;
        if is_worse(wssq0) { prev_best } else { Vec::new() }
    };

    let mut pruned_ends = kept_locations
        .iter()
        .map(|&loc| segment_ends[loc - 1])
        .collect::<Vec<_>>();
    pruned_ends.push(n);
    pruned_ends
}

/// Merge adjacent segments while the smallest difference between adjacent segment medians is
/// below `undo_sd` trimmed standard deviations
///
pub fn sd_undo_change_points(
    data: &[f64],
    segment_ends: &[usize],
    trimmed_sd: f64,
    undo_sd: f64,
) -> Vec<usize> {
    let threshold = undo_sd * trimmed_sd;
    let mut ends = segment_ends.to_vec();
    while ends.len() > 1 {
        let medians = std::iter::once(0)
            .chain(ends.iter().copied())
            .tuple_windows()
            .map(|(start, end)| median(&data[start..end]))
            .collect::<Vec<_>>();

        let (min_index, min_diff) = medians
            .iter()
            .tuple_windows()
            .map(|(a, b)| (b - a).abs())
            .enumerate()
            .fold((0, f64::INFINITY), |acc, (i, x)| if x < acc.1 { (i, x) } else { acc });

        if min_diff < threshold {
            ends.remove(min_index);
        } else {
            break;
        }
    }
    ends
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(segments: &[(usize, f64)]) -> Vec<f64> {
        segments
            .iter()
            .flat_map(|&(len, level)| {
                (0..len).map(move |i| level + if i % 2 == 0 { 0.05 } else { -0.05 })
            })
            .collect()
    }

    #[test]
    fn test_next_combination() {
        let mut loc = vec![1, 2];
        let mut all = vec![loc.clone()];
        while next_combination(2, 2, &mut loc) {
            all.push(loc.clone());
        }
        all.push(loc.clone());
        assert_eq!(
            all,
            vec![
                vec![1, 2],
                vec![1, 3],
                vec![1, 4],
                vec![2, 3],
                vec![2, 4],
                vec![3, 4]
            ]
        );
    }

    #[test]
    fn test_explained_sum_of_squares() {
        let lengths = [2, 2];
        let sums = [2.0, 6.0];
        assert_eq!(explained_sum_of_squares(&lengths, &sums, &[1]), 2.0 + 18.0);
        assert_eq!(explained_sum_of_squares(&lengths, &sums, &[]), 16.0);
    }

    #[test]
    fn test_prune_spurious_change_point() {
        // The change point at 20 separates two segments at the same level
        let data = levels(&[(20, 1.0), (20, 1.0), (40, 3.0)]);
        let pruned = prune_change_points(&data, &[20, 40, 80], 0.05);
        assert_eq!(pruned, vec![40, 80]);
    }

    #[test]
    fn test_prune_keeps_real_change_points() {
        let data = levels(&[(20, 1.0), (20, 2.0), (40, 3.0)]);
        let pruned = prune_change_points(&data, &[20, 40, 80], 0.05);
        assert_eq!(pruned, vec![20, 40, 80]);
    }

    #[test]
    fn test_prune_stops_at_intermediate_count() {
        // Only the change point at 20 is spurious, so pruning stops at two of three change points
        let data = levels(&[(20, 1.0), (20, 1.0), (20, 2.0), (20, 3.0)]);
        let pruned = prune_change_points(&data, &[20, 40, 60, 80], 0.05);
        assert_eq!(pruned, vec![40, 60, 80]);
    }

    #[test]
    fn test_prune_single_change_point() {
        let data = levels(&[(20, 1.0), (20, 1.0)]);
        assert_eq!(prune_change_points(&data, &[20, 40], 0.05), vec![40]);

        let data = levels(&[(20, 1.0), (20, 3.0)]);
        assert_eq!(prune_change_points(&data, &[20, 40], 0.05), vec![20, 40]);
    }

    #[test]
    fn test_sd_undo_change_points() {
        let data = levels(&[(10, 1.0), (10, 1.2), (10, 3.0)]);
        let ends = sd_undo_change_points(&data, &[10, 20, 30], 0.1, 3.0);
        assert_eq!(ends, vec![20, 30]);

        let ends = sd_undo_change_points(&data, &[10, 20, 30], 0.01, 3.0);
        assert_eq!(ends, vec![10, 20, 30]);
    }
}
