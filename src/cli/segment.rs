use camino::Utf8PathBuf;
use clap::Args;
use const_format::concatcp;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail};

use super::utils::{
    check_optional_region_file, check_optional_sample_file_list, check_sample_file_list,
};
use crate::cbs::{CbsParams, SplitUndo};
use crate::hmm::{EmissionFamily, HmmParams};
use crate::segmentation::{SegmentationMethod, SegmentationParams};
use crate::wavelet::WaveletParams;

#[derive(Args, Deserialize, Serialize)]
pub struct SegmentSettings {
    /// Directory for all output (must not already exist)
    #[arg(long, value_name = "DIR", default_value = concatcp!(env!("CARGO_PKG_NAME"), "_output"))]
    pub output_dir: Utf8PathBuf,

    /// Coverage bins for one sample, as tab-separated 'chrom start end score' records
    ///
    /// Repeat this option to segment multiple samples. All samples must share the same bin layout.
    ///
    #[arg(long = "bins", value_name = "FILE", required = true)]
    pub bins_filenames: Vec<String>,

    /// Allele counts used to build an allele frequency track for one sample
    ///
    /// Records are tab-separated, with chromosome and 1-based position in the first two columns
    /// and reference and alternate allele counts in the fifth and sixth columns. If given, this
    /// option must be repeated once for each '--bins' file, in the same sample order.
    ///
    #[arg(long = "vaf", value_name = "FILE")]
    pub vaf_filenames: Vec<String>,

    /// Regions of the genome to exclude from segmentation, in BED format
    ///
    /// Bins intersecting these regions are dropped, and segments are split across the midpoint of
    /// each region.
    ///
    #[arg(long = "forbidden-regions", value_name = "FILE")]
    pub forbidden_regions_filename: Option<String>,

    /// Common CNV intervals, in BED format. Segment breakpoints are forced at the boundaries of
    /// each interval.
    #[arg(long = "common-cnvs", value_name = "FILE")]
    pub common_cnvs_filename: Option<String>,

    /// Segmentation method
    #[arg(long, value_enum, default_value_t = SegmentationMethod::Wavelets)]
    pub method: SegmentationMethod,

    /// Use the somatic noise threshold profile for wavelet segmentation
    #[arg(long)]
    pub somatic: bool,

    /// Segment the allele frequency track instead of coverage (wavelets method only)
    #[arg(long)]
    pub use_vaf: bool,

    /// Multiplier applied to the MAD noise estimate for wavelet thresholds
    #[arg(long, default_value_t = 2.0)]
    pub mad_factor: f64,

    /// Significance level for accepting CBS change points
    #[arg(long, default_value_t = 0.01)]
    pub cbs_alpha: f64,

    /// Method used to remove spurious CBS change points
    #[arg(long, value_enum, default_value_t = SplitUndo::None)]
    pub cbs_undo_splits: SplitUndo,

    /// Lower bound of the wavelet noise estimate on coverage
    #[arg(long, default_value_t = 5.0)]
    pub threshold_lower: f64,

    /// Upper bound of the wavelet noise estimate
    #[arg(long, default_value_t = 80.0)]
    pub threshold_upper: f64,

    /// Lower bound of the wavelet noise estimate on allele frequency
    #[arg(long, default_value_t = 0.05)]
    pub threshold_lower_maf: f64,

    /// Number of HMM copy number states
    #[arg(long, default_value_t = 5)]
    pub hmm_states: usize,

    /// HMM emission distribution family
    #[arg(long, value_enum, default_value_t = EmissionFamily::NegativeBinomial)]
    pub hmm_emission: EmissionFamily,

    /// Chromosomes with this many usable bins or fewer are reported as a single segment
    #[arg(long, default_value_t = 10)]
    pub min_size: usize,

    /// Adjacent bins further apart than this start a new segment in the partitioned output. A
    /// negative value disables this rule.
    #[arg(long, default_value_t = 1_000_000, allow_negative_numbers = true)]
    pub max_inter_bin_dist: i64,

    /// Random seed for CBS permutation tests
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Number of permutations used to test each CBS change point
    #[arg(hide = true, long, default_value_t = 10000)]
    pub cbs_permutations: u32,

    /// Reserved bin evenness threshold. This value is recorded but currently has no effect.
    #[arg(hide = true, long)]
    pub evenness_score_threshold: Option<f64>,

    /// Reserved bin evenness window. This value is recorded but currently has no effect.
    #[arg(hide = true, long)]
    pub evenness_score_window: Option<usize>,
}

impl SegmentSettings {
    /// Convert command-line settings into the parameters of each segmentation engine
    ///
    pub fn get_segmentation_params(&self) -> SegmentationParams {
        SegmentationParams {
            method: self.method,
            cbs: CbsParams {
                alpha: self.cbs_alpha,
                n_perm: self.cbs_permutations,
                undo_splits: self.cbs_undo_splits,
                ..Default::default()
            },
            wavelet: WaveletParams {
                threshold_lower: self.threshold_lower,
                threshold_upper: self.threshold_upper,
                threshold_lower_maf: self.threshold_lower_maf,
                mad_factor: self.mad_factor,
                is_somatic: self.somatic,
                use_vaf: self.use_vaf,
                min_size: self.min_size,
            },
            hmm: HmmParams {
                state_count: self.hmm_states,
                emission_family: self.hmm_emission,
                min_size: self.min_size,
                ..Default::default()
            },
            seed: self.seed,
        }
    }
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
/// Assumes that the logger is not setup
///
pub fn validate_and_fix_segment_settings(settings: SegmentSettings) -> SimpleResult<SegmentSettings> {
    check_sample_file_list(&settings.bins_filenames, "--bins", "coverage bins")?;
    check_optional_sample_file_list(
        &settings.vaf_filenames,
        "--vaf",
        "allele frequency",
        settings.bins_filenames.len(),
        "--bins",
    )?;
    check_optional_region_file(settings.forbidden_regions_filename.as_ref(), "forbidden regions")?;
    check_optional_region_file(settings.common_cnvs_filename.as_ref(), "common CNV")?;

    if settings.use_vaf {
        if settings.vaf_filenames.is_empty() {
            bail!("--use-vaf requires --vaf input");
        }
        if settings.method != SegmentationMethod::Wavelets {
            bail!("--use-vaf is only supported with '--method {}'", SegmentationMethod::Wavelets);
        }
    }

    if settings.mad_factor <= 0.0 {
        bail!("--mad-factor must be greater than 0");
    }
    if settings.cbs_alpha <= 0.0 || settings.cbs_alpha >= 1.0 {
        bail!("--cbs-alpha must be in (0,1)");
    }
    if settings.threshold_lower > settings.threshold_upper {
        bail!("--threshold-lower must not exceed --threshold-upper");
    }
    if settings.threshold_lower_maf > settings.threshold_upper {
        bail!("--threshold-lower-maf must not exceed --threshold-upper");
    }
    if settings.hmm_states < 2 || settings.hmm_states > u8::MAX as usize {
        bail!("--hmm-states must be in [2,{}]", u8::MAX);
    }
    if settings.cbs_permutations == 0 {
        bail!("--cbs-permutations must be greater than 0");
    }

    Ok(settings)
}
