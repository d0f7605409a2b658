//! Genome-wide segmentation, dispatching each chromosome to the selected engine
//!

use std::sync::mpsc::channel;

use clap::ValueEnum;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use simple_error::SimpleResult;

use crate::cbs::{self, CbsParams, SplitUndo};
use crate::genome_regions::GenomeIntervals;
use crate::genomic_bins::{ChromBins, GenomeBins};
use crate::hmm::{self, HmmParams};
use crate::int_range::IntRange;
use crate::segments::{
    ChromSegments, GenomeSegments, derive_segments, overlap_common_regions, remap_common_regions,
    split_overlapping_segments,
};
use crate::stats_utils::{get_finite_indices, select_values};
use crate::wavelet::{self, WaveletParams};

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize, ValueEnum, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SegmentationMethod {
    Cbs,
    #[default]
    Wavelets,
    Hmm,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SegmentationParams {
    pub method: SegmentationMethod,
    pub cbs: CbsParams,
    pub wavelet: WaveletParams,
    pub hmm: HmmParams,

    /// Seed for the permutation tests of the CBS engine
    pub seed: u64,
}

/// Read-only data shared by all chromosome segmentation tasks
///
struct SharedSegmentationData<'a> {
    params: &'a SegmentationParams,

    /// CBS sequential stopping boundary, empty for other methods
    boundary: Vec<u32>,

    /// Per-sample genome-wide noise estimate, used by CBS SD undo
    trimmed_sds: Vec<Option<f64>>,

    haploid_means: Vec<f64>,
    common_cnvs: Option<&'a GenomeIntervals>,
}

/// Per-sample standard deviation over the finite coverage of all chromosomes, robust to outliers
///
fn get_trimmed_sds(genome_bins: &GenomeBins, trim: f64) -> Vec<Option<f64>> {
    (0..genome_bins.sample_count())
        .map(|sample_index| {
            let chrom_scores = genome_bins
                .chroms
                .iter()
                .map(|chrom_bins| {
                    let scores = &chrom_bins.coverage[sample_index];
                    select_values(scores, &get_finite_indices(scores))
                })
                .collect::<Vec<_>>();
            let trimmed_sd = cbs::get_trimmed_variance(&chrom_scores, trim).sqrt();
            debug!("Trimmed SD for sample index {sample_index}: {trimmed_sd}");
            Some(trimmed_sd)
        })
        .collect()
}

/// Get breakpoints for each sample on one chromosome
///
/// The HMM segments all samples jointly and returns a single breakpoint list.
///
fn get_sample_breakpoints(
    chrom_bins: &ChromBins,
    shared_data: &SharedSegmentationData,
    chrom_seed: u64,
) -> SimpleResult<Vec<Vec<usize>>> {
    let params = shared_data.params;
    let sample_count = chrom_bins.coverage.len();
    let sample_breakpoints = match params.method {
        SegmentationMethod::Cbs => {
            let mut rng = StdRng::seed_from_u64(chrom_seed);
            (0..sample_count)
                .map(|sample_index| {
                    cbs::get_chrom_breakpoints(
                        &chrom_bins.coverage[sample_index],
                        &params.cbs,
                        &shared_data.boundary,
                        shared_data.trimmed_sds[sample_index],
                        &mut rng,
                    )
                })
                .collect()
        }
        SegmentationMethod::Wavelets => (0..sample_count)
            .map(|sample_index| wavelet::get_chrom_breakpoints(chrom_bins, sample_index, &params.wavelet))
            .collect::<SimpleResult<Vec<_>>>()?,
        SegmentationMethod::Hmm => vec![hmm::get_chrom_breakpoints(
            chrom_bins,
            &shared_data.haploid_means,
            &params.hmm,
        )],
    };
    Ok(sample_breakpoints)
}

/// Segment one chromosome over all samples
///
fn segment_chrom(
    chrom_bins: &ChromBins,
    shared_data: &SharedSegmentationData,
    chrom_seed: u64,
) -> SimpleResult<ChromSegments> {
    let sample_breakpoints = get_sample_breakpoints(chrom_bins, shared_data, chrom_seed)?;

    let chrom_common_cnvs: &[IntRange] = shared_data
        .common_cnvs
        .and_then(|x| x.get(&chrom_bins.chrom))
        .map(|x| x.as_slice())
        .unwrap_or_default();
    let common_intervals = remap_common_regions(chrom_common_cnvs, &chrom_bins.start, &chrom_bins.end);
    if !chrom_common_cnvs.is_empty() {
        debug!(
            "Mapped {} of {} common CNV intervals onto {} bins",
            common_intervals.len(),
            chrom_common_cnvs.len(),
            chrom_bins.chrom
        );
    }

    let bin_count = chrom_bins.len();
    let mut sample_segments = sample_breakpoints
        .into_iter()
        .map(|breakpoints| {
            let breakpoints = if common_intervals.is_empty() {
                breakpoints
            } else {
                overlap_common_regions(&breakpoints, &common_intervals)
            };
            derive_segments(&breakpoints, bin_count, &chrom_bins.start, &chrom_bins.end)
        })
        .collect::<Vec<_>>();

    let segments = if sample_segments.len() == 1 {
        sample_segments.swap_remove(0)
    } else {
        split_overlapping_segments(&sample_segments)
    };

    debug!(
        "Segmented {} into {} segments over {} bins",
        chrom_bins.chrom,
        segments.len(),
        bin_count
    );

    Ok(ChromSegments {
        chrom: chrom_bins.chrom.clone(),
        segments,
    })
}

/// Segment all chromosomes, running one task per chromosome on a worker pool
///
/// Results are returned in input chromosome order, and do not depend on the thread count.
///
/// # Arguments
/// * `common_cnvs` - Intervals whose boundaries are forced into the segmentation
///
pub fn segment_genome(
    genome_bins: &GenomeBins,
    common_cnvs: Option<&GenomeIntervals>,
    params: &SegmentationParams,
    thread_count: usize,
) -> SimpleResult<GenomeSegments> {
    info!("Segmenting {} chromosomes with method: {}", genome_bins.chroms.len(), params.method);

    let is_cbs = params.method == SegmentationMethod::Cbs;
    let boundary = if is_cbs {
        info!("Computing CBS stopping boundary for {} permutations", params.cbs.n_perm);
        cbs::compute_boundary(params.cbs.n_perm, params.cbs.alpha, params.cbs.eta)
    } else {
        Vec::new()
    };

    let trimmed_sds = if is_cbs && params.cbs.undo_splits == SplitUndo::SdUndo {
        get_trimmed_sds(genome_bins, params.cbs.trim)
    } else {
        vec![None; genome_bins.sample_count()]
    };

    let shared_data = SharedSegmentationData {
        params,
        boundary,
        trimmed_sds,
        haploid_means: genome_bins.get_haploid_means(),
        common_cnvs,
    };

    // Draw all chromosome seeds up front so that results are independent of task scheduling
    let mut master_rng = StdRng::seed_from_u64(params.seed);
    let chrom_seeds = genome_bins
        .chroms
        .iter()
        .map(|_| master_rng.random::<u64>())
        .collect::<Vec<_>>();

    let worker_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build()
        .unwrap();

    let shared_data = &shared_data;
    let chrom_seeds = &chrom_seeds;
    let (tx, rx) = channel();
    worker_pool.scope(move |scope| {
        for (chrom_index, chrom_bins) in genome_bins.chroms.iter().enumerate() {
            let tx = tx.clone();
            scope.spawn(move |_| {
                let result = segment_chrom(chrom_bins, shared_data, chrom_seeds[chrom_index]);
                tx.send((chrom_index, result)).unwrap();
            });
        }
    });

    let mut chroms = vec![None; genome_bins.chroms.len()];
    for (chrom_index, result) in rx {
        chroms[chrom_index] = Some(result?);
    }

    let genome_segments = GenomeSegments {
        chroms: chroms.into_iter().map(Option::unwrap).collect(),
    };

    info!("Found {} segments", genome_segments.segment_count());

    Ok(genome_segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segments::Segment;

    fn get_test_chrom(chrom: &str, coverage: Vec<Vec<f64>>) -> ChromBins {
        let bin_count = coverage[0].len() as i64;
        let mut chrom_bins = ChromBins::new(chrom);
        chrom_bins.start = (0..bin_count).map(|x| x * 1000).collect();
        chrom_bins.end = chrom_bins.start.iter().map(|x| x + 1000).collect();
        chrom_bins.coverage = coverage;
        chrom_bins
    }

    fn get_step_coverage(bin_count: usize, step: usize, low: f64, high: f64) -> Vec<f64> {
        (0..bin_count)
            .map(|i| {
                let level = if i < step { low } else { high };
                level + if i % 2 == 0 { 1.0 } else { -1.0 }
            })
            .collect()
    }

    fn get_test_genome() -> GenomeBins {
        GenomeBins {
            sample_names: vec!["sample1".to_string()],
            chroms: vec![
                get_test_chrom("chr1", vec![get_step_coverage(300, 100, 30.0, 60.0)]),
                get_test_chrom("chr2", vec![vec![30.0; 3]]),
                get_test_chrom("chr3", vec![vec![f64::NAN; 40]]),
            ],
        }
    }

    #[test]
    fn test_segment_genome_wavelets() {
        let genome_bins = get_test_genome();
        let params = SegmentationParams::default();
        let genome_segments = segment_genome(&genome_bins, None, &params, 2).unwrap();

        let chroms = &genome_segments.chroms;
        assert_eq!(chroms.len(), 3);
        assert_eq!(chroms[0].chrom, "chr1");
        assert_eq!(
            chroms[0].segments,
            vec![
                Segment {
                    start: 0,
                    end: 100_000
                },
                Segment {
                    start: 100_000,
                    end: 300_000
                },
            ]
        );

        // Short and all-NaN chromosomes become a single segment
        assert_eq!(chroms[1].segments, vec![Segment { start: 0, end: 3000 }]);
        assert_eq!(
            chroms[2].segments,
            vec![Segment {
                start: 0,
                end: 40_000
            }]
        );
    }

    #[test]
    fn test_segment_genome_common_cnvs() {
        let genome_bins = get_test_genome();
        let params = SegmentationParams::default();
        let mut common_cnvs = GenomeIntervals::new();
        common_cnvs.insert("chr1".to_string(), vec![IntRange::from_pair(150_000, 200_000)]);

        let genome_segments = segment_genome(&genome_bins, Some(&common_cnvs), &params, 1).unwrap();
        let starts = genome_segments.chroms[0]
            .segments
            .iter()
            .map(|x| x.start)
            .collect::<Vec<_>>();
        assert_eq!(starts, vec![0, 100_000, 150_000, 200_000]);
    }

    #[test]
    fn test_segment_genome_multi_sample() {
        let genome_bins = GenomeBins {
            sample_names: vec!["sample1".to_string(), "sample2".to_string()],
            chroms: vec![get_test_chrom(
                "chr1",
                vec![
                    get_step_coverage(300, 100, 30.0, 60.0),
                    get_step_coverage(300, 200, 30.0, 60.0),
                ],
            )],
        };
        let params = SegmentationParams::default();
        let genome_segments = segment_genome(&genome_bins, None, &params, 1).unwrap();
        let starts = genome_segments.chroms[0]
            .segments
            .iter()
            .map(|x| x.start)
            .collect::<Vec<_>>();
        assert_eq!(starts, vec![0, 100_000, 200_000]);
    }

    #[test]
    fn test_segment_genome_hmm() {
        let genome_bins = GenomeBins {
            sample_names: vec!["sample1".to_string()],
            chroms: vec![get_test_chrom(
                "chr1",
                vec![get_step_coverage(400, 300, 30.0, 60.0)],
            )],
        };
        let params = SegmentationParams {
            method: SegmentationMethod::Hmm,
            ..Default::default()
        };
        let genome_segments = segment_genome(&genome_bins, None, &params, 1).unwrap();
        let starts = genome_segments.chroms[0]
            .segments
            .iter()
            .map(|x| x.start)
            .collect::<Vec<_>>();
        assert_eq!(starts, vec![0, 300_000]);
    }

    #[test]
    fn test_segment_genome_cbs_thread_independent() {
        let genome_bins = get_test_genome();
        let params = SegmentationParams {
            method: SegmentationMethod::Cbs,
            cbs: CbsParams {
                n_perm: 1000,
                undo_splits: SplitUndo::SdUndo,
                ..Default::default()
            },
            seed: 7,
            ..Default::default()
        };
        let segments1 = segment_genome(&genome_bins, None, &params, 1).unwrap();
        let segments3 = segment_genome(&genome_bins, None, &params, 3).unwrap();
        for (a, b) in segments1.chroms.iter().zip(segments3.chroms.iter()) {
            assert_eq!(a.segments, b.segments);
        }
        assert_eq!(segments1.chroms[0].segments.len(), 2);
        assert_eq!(segments1.chroms[0].segments[1].start, 100_000);
    }
}
