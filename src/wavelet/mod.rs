//! Unbalanced Haar wavelet segmentation
//!

mod haar;

use log::debug;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail};

use crate::genomic_bins::ChromBins;
use crate::stats_utils::{first_differences, get_finite_indices, median_abs_deviation, select_values};
use haar::get_haar_breakpoints;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WaveletParams {
    /// Lower bound of the noise estimate for coverage scores
    pub threshold_lower: f64,

    /// Upper bound of the noise estimate
    pub threshold_upper: f64,

    /// Lower bound of the noise estimate for allele frequency values
    pub threshold_lower_maf: f64,

    pub mad_factor: f64,

    /// Estimate noise from first differences instead of raw values
    pub is_somatic: bool,

    /// Segment the allele frequency track instead of coverage
    pub use_vaf: bool,

    /// Chromosomes with this many values or fewer are not segmented
    pub min_size: usize,
}

impl Default for WaveletParams {
    fn default() -> Self {
        Self {
            threshold_lower: 5.0,
            threshold_upper: 80.0,
            threshold_lower_maf: 0.05,
            mad_factor: 2.0,
            is_somatic: false,
            use_vaf: false,
            min_size: 10,
        }
    }
}

/// Robust noise level used to threshold wavelet coefficients
///
fn get_noise_sigma(x: &[f64], params: &WaveletParams) -> f64 {
    let mad = if params.is_somatic {
        median_abs_deviation(&first_differences(x)) / 2f64.sqrt()
    } else {
        median_abs_deviation(x)
    };
    let lower = if params.use_vaf {
        params.threshold_lower_maf
    } else {
        params.threshold_lower
    };
    (params.mad_factor * mad).clamp(lower, params.threshold_upper)
}

/// Segment one sample over one chromosome
///
/// Returns breakpoints as coverage bin indices, starting with 0. Breakpoints found on the
/// allele frequency track are mapped back to the coverage bins the values were drawn from.
///
pub fn get_chrom_breakpoints(
    chrom_bins: &ChromBins,
    sample_index: usize,
    params: &WaveletParams,
) -> SimpleResult<Vec<usize>> {
    let (values, index_table) = if params.use_vaf {
        let Some(vaf) = chrom_bins.vaf.get(sample_index) else {
            bail!(
                "No allele frequency input for sample index {} on {}",
                sample_index,
                chrom_bins.chrom
            );
        };
        (vaf.values.clone(), vaf.coverage_index.clone())
    } else {
        let scores = &chrom_bins.coverage[sample_index];
        let finite_indices = get_finite_indices(scores);
        (select_values(scores, &finite_indices), finite_indices)
    };

    if values.len() <= params.min_size {
        debug!(
            "Skipping wavelet segmentation of {} with {} values",
            chrom_bins.chrom,
            values.len()
        );
        return Ok(vec![0]);
    }

    let sigma = get_noise_sigma(&values, params);
    let breakpoints = get_haar_breakpoints(&values, sigma);

    let mut mapped = vec![0];
    for &breakpoint in breakpoints.iter().skip(1) {
        let Some(&bin_index) = index_table.get(breakpoint) else {
            bail!(
                "Wavelet breakpoint {} on {} is outside of the bin index table of length {}",
                breakpoint,
                chrom_bins.chrom,
                index_table.len()
            );
        };
        mapped.push(bin_index);
    }
    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomic_bins::VafTrack;

    fn get_test_chrom(coverage: Vec<f64>) -> ChromBins {
        let mut chrom_bins = ChromBins::new("chr1");
        chrom_bins.start = (0..coverage.len() as i64).map(|x| x * 1000).collect();
        chrom_bins.end = chrom_bins.start.iter().map(|x| x + 1000).collect();
        chrom_bins.coverage = vec![coverage];
        chrom_bins
    }

    #[test]
    fn test_noise_sigma() {
        let params = WaveletParams::default();
        let x = (0..100).map(|i| if i % 2 == 0 { 10.0 } else { 30.0 }).collect::<Vec<_>>();

        // Germline: MAD of the values, clamped to the upper bound
        assert_eq!(get_noise_sigma(&x, &params), 2.0 * 1.4826 * 10.0);

        // Somatic: differences are +-20, MAD 0 clamps to the lower bound
        let somatic = WaveletParams {
            is_somatic: true,
            ..Default::default()
        };
        assert_eq!(get_noise_sigma(&x, &somatic), 5.0);

        let vaf = WaveletParams {
            is_somatic: true,
            use_vaf: true,
            ..Default::default()
        };
        assert_eq!(get_noise_sigma(&x, &vaf), 0.05);
    }

    #[test]
    fn test_chrom_breakpoints_non_finite() {
        let params = WaveletParams::default();

        let chrom_bins = get_test_chrom(vec![f64::NAN; 50]);
        assert_eq!(get_chrom_breakpoints(&chrom_bins, 0, &params).unwrap(), vec![0]);

        let chrom_bins = get_test_chrom(vec![3.0; 50]);
        assert_eq!(get_chrom_breakpoints(&chrom_bins, 0, &params).unwrap(), vec![0]);

        // A step at finite index 100 is reported at its coverage index
        let mut coverage = (0..200)
            .map(|i| if i < 100 { 30.0 } else { 90.0 })
            .collect::<Vec<_>>();
        coverage.insert(10, f64::NAN);
        let chrom_bins = get_test_chrom(coverage);
        assert_eq!(
            get_chrom_breakpoints(&chrom_bins, 0, &params).unwrap(),
            vec![0, 101]
        );
    }

    #[test]
    fn test_chrom_breakpoints_vaf() {
        let params = WaveletParams {
            is_somatic: true,
            use_vaf: true,
            ..Default::default()
        };
        let mut chrom_bins = get_test_chrom(vec![30.0; 120]);
        chrom_bins.vaf = vec![VafTrack {
            values: (0..60).map(|i| if i < 30 { 0.5 } else { 1.0 }).collect(),
            coverage_index: (0..60).map(|i| i * 2).collect(),
        }];
        assert_eq!(
            get_chrom_breakpoints(&chrom_bins, 0, &params).unwrap(),
            vec![0, 60]
        );

        // A truncated index table is an input error
        chrom_bins.vaf[0].coverage_index.truncate(20);
        assert!(get_chrom_breakpoints(&chrom_bins, 0, &params).is_err());
    }
}
