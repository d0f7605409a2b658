//! Binary segmentation driver
//!

use rand::Rng;
use rand::seq::SliceRandom;

use super::prune::{prune_change_points, sd_undo_change_points};
use super::t_statistic::{
    edge_permutation_p_value, max_arc_observed, max_arc_stat_permuted,
    max_short_arc_stat_permuted,
};
use super::tail_prob::tail_probability;
use super::{CbsParams, PValueMethod, SplitUndo};
use crate::stats_utils::{first_differences, median_abs_deviation};

/// Scratch buffers reused across all segment tests on one chromosome
struct Workspace {
    sx: Vec<f64>,
    px: Vec<f64>,
}

/// Sequential permutation test of the observed maximal statistic
///
/// Returns true if the observed statistic is significant, stopping early once the stopping
/// boundary is crossed.
///
#[allow(clippy::too_many_arguments)]
fn run_permutation_test<R: Rng>(
    x: &[f64],
    ostat: f64,
    max_rejections: u32,
    boundary: &[u32],
    n_perm: u32,
    ws: &mut Workspace,
    rng: &mut R,
    permuted_stat: impl Fn(&[f64], &mut [f64]) -> f64,
) -> bool {
    let n = x.len();
    let mut rejection_count = 0;
    let mut boundary_index = {
        let m = max_rejections as usize;
        m * (m + 1) / 2
    };
    for perm_index in 1..=n_perm {
        let px = &mut ws.px[..n];
        px.copy_from_slice(x);
        px.shuffle(rng);
        let pstat = permuted_stat(px, &mut ws.sx[..n]);
        if ostat <= pstat {
            rejection_count += 1;
            boundary_index += 1;
        }
        if rejection_count > max_rejections {
            return false;
        }
        if boundary
            .get(boundary_index)
            .is_some_and(|&stop_perm| perm_index >= stop_perm)
        {
            break;
        }
    }
    true
}

/// Test one segment for a significant arc
///
/// Returns zero, one or two change points relative to the segment start.
///
/// # Arguments
/// * `x` - Centered segment data
/// * `tss` - Total sum of squares of `x`
/// * `hybrid_delta` - Minimum relative arc length for the tail approximation, None to use the
///   full permutation test
///
fn find_change_points<R: Rng>(
    x: &[f64],
    tss: f64,
    params: &CbsParams,
    hybrid_delta: Option<f64>,
    boundary: &[u32],
    ws: &mut Workspace,
    rng: &mut R,
) -> Vec<usize> {
    let n = x.len();
    let al0 = params.min_width;
    let is_binary = params.is_binary;

    let arc = max_arc_observed(x, tss, &mut ws.sx[..n], al0, is_binary);
    let ostat1 = arc.stat.sqrt();
    let ostat = arc.stat * 0.99999;
    if ostat1 <= 0.1 {
        return Vec::new();
    }

    let (iseg0, iseg1) = (arc.start, arc.end);
    let arc_len = std::cmp::min(iseg1 - iseg0, n - iseg1 + iseg0);

    // Large statistics over long enough arcs are accepted without a p-value
    if !(ostat1 >= 7.0 && arc_len >= 10) {
        let alpha = params.alpha;
        let n_perm = params.n_perm;
        let is_significant = match hybrid_delta {
            Some(delta) => {
                let p1 = tail_probability(ostat1, delta, n, params.n_grid, params.tol);
                if p1 > alpha {
                    false
                } else {
                    let max_rejections = ((alpha - p1) * n_perm as f64) as u32;
                    run_permutation_test(x, ostat, max_rejections, boundary, n_perm, ws, rng, |px, sx| {
                        max_short_arc_stat_permuted(params.k_max, tss, px, sx, al0, is_binary)
                    })
                }
            }
            None => {
                let max_rejections = (alpha * n_perm as f64) as u32;
                run_permutation_test(x, ostat, max_rejections, boundary, n_perm, ws, rng, |px, sx| {
                    max_arc_stat_permuted(px, tss, sx, al0, is_binary)
                })
            }
        };
        if !is_significant {
            return Vec::new();
        }
    }

    if iseg1 == n {
        vec![iseg0]
    } else if iseg0 == 0 {
        vec![iseg1]
    } else {
        // Check each side of the arc for an edge effect
        let mut change_points = Vec::new();
        let p = edge_permutation_p_value(iseg0, &x[..iseg1], &mut ws.px, params.n_perm, rng);
        if p <= params.alpha {
            change_points.push(iseg0);
        }
        let p = edge_permutation_p_value(iseg1 - iseg0, &x[iseg0..], &mut ws.px, params.n_perm, rng);
        if p <= params.alpha {
            change_points.push(iseg1);
        }
        change_points
    }
}

/// Segment `data` by recursive binary segmentation
///
/// Returns the exclusive end index of each segment, the final entry being the data length.
///
/// # Arguments
/// * `boundary` - Sequential stopping boundary computed for the parameter's permutation count
///   and alpha
/// * `trimmed_sd` - Noise estimate used to undo splits, estimated from the data when None
///
pub fn get_segment_ends<R: Rng>(
    data: &[f64],
    params: &CbsParams,
    boundary: &[u32],
    trimmed_sd: Option<f64>,
    rng: &mut R,
) -> Vec<usize> {
    let n = data.len();
    if n == 0 {
        return Vec::new();
    }

    let mut ws = Workspace {
        sx: vec![0.0; n],
        px: vec![0.0; n],
    };

    // Segments still to be tested are represented by a stack of boundaries, processed from the
    // right so that accepted segment ends are produced in descending order
    let mut pending = vec![0, n];
    let mut segment_ends = Vec::new();
    while pending.len() > 1 {
        let k = pending.len();
        let seg_start = pending[k - 2];
        let seg_end = pending[k - 1];
        let current_n = seg_end - seg_start;

        let mut change_points = Vec::new();
        if current_n >= 2 * params.min_width {
            let hybrid_delta = (params.p_method == PValueMethod::Hybrid && params.n_min < current_n)
                .then(|| (params.k_max + 1) as f64 / current_n as f64);

            let segment = &data[seg_start..seg_end];
            let is_constant = segment.iter().all(|&v| v == segment[0]);
            if !is_constant {
                let mean = segment.iter().sum::<f64>() / current_n as f64;
                let centered = segment.iter().map(|v| v - mean).collect::<Vec<_>>();
                let tss = centered.iter().map(|v| v * v).sum::<f64>();
                change_points =
                    find_change_points(&centered, tss, params, hybrid_delta, boundary, &mut ws, rng);
            }
        }

        if change_points.is_empty() {
            segment_ends.push(seg_end);
            pending.pop();
        } else {
            pending.splice(
                (k - 1)..(k - 1),
                change_points.into_iter().map(|x| x + seg_start),
            );
        }
    }
    segment_ends.reverse();

    if segment_ends.len() > 1 {
        segment_ends = match params.undo_splits {
            SplitUndo::None => segment_ends,
            SplitUndo::Prune => prune_change_points(data, &segment_ends, params.undo_prune),
            SplitUndo::SdUndo => {
                let trimmed_sd = trimmed_sd
                    .filter(|&x| x > 0.0)
                    .unwrap_or_else(|| median_abs_deviation(&first_differences(data)) / 2f64.sqrt());
                sd_undo_change_points(data, &segment_ends, trimmed_sd, params.undo_sd)
            }
        };
    }
    segment_ends
}

#[cfg(test)]
mod tests {
    use super::super::boundary::compute_boundary;
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn test_params() -> CbsParams {
        CbsParams {
            n_perm: 1000,
            ..Default::default()
        }
    }

    fn levels(segments: &[(usize, f64)]) -> Vec<f64> {
        segments
            .iter()
            .flat_map(|&(len, level)| {
                (0..len).map(move |i| level + if i % 2 == 0 { 0.1 } else { -0.1 })
            })
            .collect()
    }

    #[test]
    fn test_permutation_test_large_rejection_limit() {
        let x = [1.0, -1.0, 2.0, -2.0];
        let mut ws = Workspace {
            sx: vec![0.0; 4],
            px: vec![0.0; 4],
        };
        let mut rng = StdRng::seed_from_u64(0);

        // A limit from 100000 permutations at alpha 0.9 must not overflow the boundary offset
        let is_significant = run_permutation_test(
            &x,
            f64::INFINITY,
            90_000,
            &[],
            20,
            &mut ws,
            &mut rng,
            |px, _| px[0].abs(),
        );
        assert!(is_significant);

        let is_significant =
            run_permutation_test(&x, 0.0, 0, &[], 20, &mut ws, &mut rng, |px, _| px[0].abs());
        assert!(!is_significant);
    }

    #[test]
    fn test_single_step() {
        let params = test_params();
        let boundary = compute_boundary(params.n_perm, params.alpha, params.eta);
        let data = levels(&[(500, 2.0), (500, 4.0)]);
        let mut rng = StdRng::seed_from_u64(0);
        let ends = get_segment_ends(&data, &params, &boundary, None, &mut rng);
        assert_eq!(ends, vec![500, 1000]);
    }

    #[test]
    fn test_inner_segment() {
        let params = test_params();
        let boundary = compute_boundary(params.n_perm, params.alpha, params.eta);
        let data = levels(&[(100, 2.0), (60, 3.0), (140, 2.0)]);
        let mut rng = StdRng::seed_from_u64(0);
        let ends = get_segment_ends(&data, &params, &boundary, None, &mut rng);
        assert_eq!(ends, vec![100, 160, 300]);
    }

    #[test]
    fn test_constant_data() {
        let params = test_params();
        let boundary = compute_boundary(params.n_perm, params.alpha, params.eta);
        let data = vec![3.0; 400];
        let mut rng = StdRng::seed_from_u64(0);
        let ends = get_segment_ends(&data, &params, &boundary, None, &mut rng);
        assert_eq!(ends, vec![400]);

        assert!(get_segment_ends(&[], &params, &boundary, None, &mut rng).is_empty());
    }

    #[test]
    fn test_sd_undo() {
        let params = CbsParams {
            undo_splits: SplitUndo::SdUndo,
            undo_sd: 3.0,
            ..test_params()
        };
        let boundary = compute_boundary(params.n_perm, params.alpha, params.eta);

        // A small step is found, then undone as it is within 3 noise SDs
        let data = levels(&[(150, 2.0), (150, 2.3)]);
        let mut rng = StdRng::seed_from_u64(0);
        let ends = get_segment_ends(&data, &params, &boundary, Some(0.2), &mut rng);
        assert_eq!(ends, vec![300]);

        let ends = get_segment_ends(&data, &params, &boundary, Some(0.05), &mut rng);
        assert_eq!(ends, vec![150, 300]);
    }
}
