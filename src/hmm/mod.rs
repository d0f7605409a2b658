//! Multi-sample copy number HMM segmentation
//!
//! All samples are segmented jointly. Each bin is assigned one copy number state, which may be
//! carried by any subset of the samples while the others stay diploid, and breakpoints are placed
//! wherever the Viterbi state path changes.
//!

mod emission;
mod model;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::genomic_bins::ChromBins;
use crate::segments::get_call_change_breakpoints;
pub use emission::EmissionFamily;
use emission::Emission;
use model::HiddenMarkovModel;

/// Floor applied to each sample's haploid coverage
const MIN_HAPLOID_MEAN: f64 = 0.1;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HmmParams {
    /// Number of copy number states, starting from copy number zero
    pub state_count: usize,

    pub emission_family: EmissionFamily,

    /// Chromosomes with this many finite bins or fewer are not segmented
    pub min_size: usize,

    /// State means are refined by EM only when there are this many samples or fewer
    pub max_em_samples: usize,

    pub max_em_iterations: usize,

    /// Relative ln likelihood improvement below which EM is considered converged
    pub em_tolerance: f64,
}

impl Default for HmmParams {
    fn default() -> Self {
        Self {
            state_count: 5,
            emission_family: EmissionFamily::default(),
            min_size: 10,
            max_em_samples: 3,
            max_em_iterations: 10,
            em_tolerance: 1e-6,
        }
    }
}

/// Coverage of all samples for each bin where every sample's value is finite
///
/// Values are clamped to `max_value`.
///
/// Returns the observations indexed as `[bin][sample]`, and the bin index of each observation
///
fn get_observations(chrom_bins: &ChromBins, max_value: f64) -> (Vec<Vec<f64>>, Vec<usize>) {
    let mut observations = Vec::new();
    let mut index_table = Vec::new();
    for bin_index in 0..chrom_bins.len() {
        let obs = chrom_bins
            .coverage
            .iter()
            .map(|x| x[bin_index])
            .collect::<Vec<_>>();
        if obs.iter().all(|x| x.is_finite()) {
            observations.push(obs.into_iter().map(|x| x.min(max_value)).collect());
            index_table.push(bin_index);
        }
    }
    (observations, index_table)
}

/// Most likely copy number state of every complete bin on one chromosome
///
/// Returns the state path and the bin index of each path entry, or None if the chromosome has too
/// few complete bins to segment.
///
fn get_chrom_state_path(
    chrom_bins: &ChromBins,
    haploid_means: &[f64],
    params: &HmmParams,
) -> Option<(Vec<u8>, Vec<usize>)> {
    assert_eq!(haploid_means.len(), chrom_bins.coverage.len());

    let haploid_means = haploid_means
        .iter()
        .map(|x| x.max(MIN_HAPLOID_MEAN))
        .collect::<Vec<_>>();
    let max_value = params.state_count as f64 * haploid_means.iter().copied().fold(0.0, f64::max);

    let (observations, index_table) = get_observations(chrom_bins, max_value);
    if observations.len() <= params.min_size {
        debug!(
            "Skipping HMM segmentation of {} with {} complete bins",
            chrom_bins.chrom,
            observations.len()
        );
        return None;
    }

    let emission = Emission::new(
        params.emission_family,
        &observations,
        &haploid_means,
        params.state_count,
    );
    let mut hmm = HiddenMarkovModel::new(emission);

    if haploid_means.len() <= params.max_em_samples {
        hmm.refine_means(&observations, params.max_em_iterations, params.em_tolerance);
    }

    Some((hmm.viterbi(&observations), index_table))
}

/// Segment all samples over one chromosome
///
/// Returns breakpoints as bin indices, starting with 0.
///
/// # Arguments
/// * `haploid_means` - Genome-wide expected coverage of a single copy in each sample
///
pub fn get_chrom_breakpoints(
    chrom_bins: &ChromBins,
    haploid_means: &[f64],
    params: &HmmParams,
) -> Vec<usize> {
    let Some((path, index_table)) = get_chrom_state_path(chrom_bins, haploid_means, params) else {
        return vec![0];
    };
    get_call_change_breakpoints(&path)
        .into_iter()
        .enumerate()
        .map(|(i, x)| if i == 0 { 0 } else { index_table[x] })
        .collect()
}
