//! Circular binary segmentation
//!
//! Change points are found by recursively testing each segment for the arc maximizing a
//! t-statistic, with significance assessed by permutation or by a hybrid of an analytic tail
//! approximation and a sequential permutation test.
//!

mod boundary;
mod change_points;
mod prune;
mod t_statistic;
mod tail_prob;

use clap::ValueEnum;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

pub use boundary::compute_boundary;
use change_points::get_segment_ends;
use crate::stats_utils::{get_finite_indices, select_values};

/// Number of grid points used to integrate the truncated normal second moment
const INFLATION_GRID_SIZE: usize = 10000;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum PValueMethod {
    /// Tail approximation for long segments, followed by a windowed permutation test
    Hybrid,
    Permutation,
}

/// Post-processing applied to the change points found by binary segmentation
///
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize, ValueEnum, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SplitUndo {
    #[default]
    None,

    /// Remove change points which do not substantially reduce the residual sum of squares
    Prune,

    /// Merge adjacent segments with similar medians
    SdUndo,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CbsParams {
    /// Significance level for accepting a change point
    pub alpha: f64,

    pub n_perm: u32,
    pub p_method: PValueMethod,

    /// Minimum number of bins in a segment
    pub min_width: usize,

    /// Maximum arc length searched by the windowed permutation statistic
    pub k_max: usize,

    /// Segments longer than this use the hybrid p-value
    pub n_min: usize,

    /// Type I error rate of the sequential stopping rule
    pub eta: f64,

    /// Fraction trimmed from each tail when estimating the noise standard deviation
    pub trim: f64,

    pub undo_splits: SplitUndo,
    pub undo_prune: f64,
    pub undo_sd: f64,

    pub n_grid: usize,
    pub tol: f64,

    /// Data are 0/1 valued, enabling a continuity correction
    pub is_binary: bool,
}

impl Default for CbsParams {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            n_perm: 10000,
            p_method: PValueMethod::Hybrid,
            min_width: 2,
            k_max: 25,
            n_min: 200,
            eta: 0.05,
            trim: 0.025,
            undo_splits: SplitUndo::None,
            undo_prune: 0.05,
            undo_sd: 3.0,
            n_grid: 100,
            tol: 1e-6,
            is_binary: false,
        }
    }
}

/// Ratio of the variance of a standard normal to the variance of the same distribution truncated
/// to its central `1 - 2*trim` mass
///
fn get_inflation_factor(trim: f64) -> f64 {
    let norm = Normal::standard();
    let a = norm.inverse_cdf(1.0 - trim);
    let step = 2.0 * a / INFLATION_GRID_SIZE as f64;
    let ex2 = (0..INFLATION_GRID_SIZE)
        .map(|i| {
            let x = -a + step / 2.0 + i as f64 * step;
            x * x * norm.pdf(x)
        })
        .sum::<f64>()
        * step
        / (1.0 - 2.0 * trim);
    1.0 / ex2
}

/// Noise variance estimated from the trimmed absolute first differences of all chromosomes
///
/// Chromosomes are concatenated in order, so the difference across each chromosome boundary is
/// included.
///
pub fn get_trimmed_variance(chrom_scores: &[Vec<f64>], trim: f64) -> f64 {
    let mut diffs = chrom_scores
        .iter()
        .flatten()
        .copied()
        .collect::<Vec<_>>()
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .collect::<Vec<_>>();
    let keep_count = ((1.0 - 2.0 * trim) * diffs.len() as f64).round_ties_even() as usize;
    if keep_count == 0 {
        return 0.0;
    }
    diffs.sort_by(|a, b| a.total_cmp(b));
    let ssq = diffs[..keep_count].iter().map(|x| x * x).sum::<f64>();
    get_inflation_factor(trim) * ssq / (2 * keep_count) as f64
}

/// Segment the scores of one sample over one chromosome
///
/// Non-finite scores are excluded from segmentation. Returns breakpoints as bin indices into
/// `scores`, starting with 0.
///
/// # Arguments
/// * `boundary` - Stopping boundary from [`compute_boundary`] for the same parameters
/// * `trimmed_sd` - Genome-wide noise estimate used by the SD undo method
///
pub fn get_chrom_breakpoints<R: Rng>(
    scores: &[f64],
    params: &CbsParams,
    boundary: &[u32],
    trimmed_sd: Option<f64>,
    rng: &mut R,
) -> Vec<usize> {
    let finite_indices = get_finite_indices(scores);
    if finite_indices.is_empty() {
        return vec![0];
    }
    let finite_scores = select_values(scores, &finite_indices);
    let segment_ends = get_segment_ends(&finite_scores, params, boundary, trimmed_sd, rng);

    std::iter::once(0)
        .chain(
            segment_ends[..segment_ends.len() - 1]
                .iter()
                .map(|&x| finite_indices[x]),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_inflation_factor() {
        let trim = 0.025;
        let norm = Normal::standard();
        let a = norm.inverse_cdf(1.0 - trim);
        let expected = 1.0 / (1.0 - 2.0 * a * norm.pdf(a) / (1.0 - 2.0 * trim));
        assert_abs_diff_eq!(get_inflation_factor(trim), expected, epsilon = 1e-6);
    }

    #[test]
    fn test_trimmed_variance() {
        // All absolute differences are 1, including the one across the chromosome boundary
        let chrom_scores = vec![vec![0.0, 1.0, 0.0, 1.0], vec![0.0, 1.0, 0.0]];
        let expected = get_inflation_factor(0.025) / 2.0;
        assert_abs_diff_eq!(get_trimmed_variance(&chrom_scores, 0.025), expected, epsilon = 1e-12);

        assert_eq!(get_trimmed_variance(&[vec![1.0]], 0.025), 0.0);
    }

    #[test]
    fn test_chrom_breakpoints_skip_non_finite() {
        let params = CbsParams {
            n_perm: 1000,
            ..Default::default()
        };
        let boundary = compute_boundary(params.n_perm, params.alpha, params.eta);

        // 1000 finite bins with a step after 500 finite values, with NaN bins interleaved early
        let mut scores = (0..1000)
            .map(|i| {
                let level = if i < 500 { 2.0 } else { 4.0 };
                level + if i % 2 == 0 { 0.1 } else { -0.1 }
            })
            .collect::<Vec<_>>();
        scores.insert(100, f64::NAN);
        scores.insert(200, f64::INFINITY);

        let mut rng = StdRng::seed_from_u64(0);
        let breakpoints = get_chrom_breakpoints(&scores, &params, &boundary, None, &mut rng);
        assert_eq!(breakpoints, vec![0, 502]);

        let all_nan = vec![f64::NAN; 20];
        assert_eq!(
            get_chrom_breakpoints(&all_nan, &params, &boundary, None, &mut rng),
            vec![0]
        );
    }
}
