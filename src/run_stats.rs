//! Track stats for the whole cnvseg run
//!

use std::fs::File;

use camino::Utf8Path;
use log::info;
use serde::{Deserialize, Serialize};
use unwrap::unwrap;

use crate::genomic_bins::GenomeBins;
use crate::segmentation::SegmentationMethod;
use crate::segments::GenomeSegments;

pub const RUN_STATS_FILENAME: &str = "run.stats.json";

#[derive(Default, Deserialize, Serialize)]
pub struct InputStats {
    pub sample_count: usize,
    pub chrom_count: usize,

    /// Bins retained after forbidden region filtering
    pub bin_count: usize,

    /// Allele frequency values summed over all samples
    pub vaf_bin_count: usize,
}

impl InputStats {
    pub fn new(genome_bins: &GenomeBins) -> Self {
        Self {
            sample_count: genome_bins.sample_count(),
            chrom_count: genome_bins.chroms.len(),
            bin_count: genome_bins.bin_count(),
            vaf_bin_count: genome_bins.vaf_bin_count(),
        }
    }
}

#[derive(Default, Deserialize, Serialize)]
pub struct SegmentationStats {
    pub method: SegmentationMethod,
    pub segment_count: usize,
    pub total_segmentation_time_secs: f64,
}

#[derive(Default, Deserialize, Serialize)]
pub struct RunStats {
    pub input_stats: InputStats,
    pub segmentation_stats: SegmentationStats,
    pub total_run_time_secs: f64,
}

impl RunStats {
    pub fn set_segmentation_stats(
        &mut self,
        method: SegmentationMethod,
        genome_segments: &GenomeSegments,
        segmentation_time_secs: f64,
    ) {
        self.segmentation_stats = SegmentationStats {
            method,
            segment_count: genome_segments.segment_count(),
            total_segmentation_time_secs: segmentation_time_secs,
        };
    }
}

/// Write run_stats structure out in json format
pub fn write_run_stats(output_dir: &Utf8Path, run_stats: &RunStats) {
    let filename = output_dir.join(RUN_STATS_FILENAME);

    info!("Writing run statistics to file: '{filename}'");

    let f = unwrap!(
        File::create(&filename),
        "Unable to create run statistics json file: '{filename}'"
    );

    serde_json::to_writer_pretty(&f, &run_stats).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os_utils::test_utils::get_scratch_path;

    #[test]
    fn test_write_run_stats() {
        let run_stats = RunStats {
            input_stats: InputStats {
                sample_count: 2,
                chrom_count: 3,
                bin_count: 1000,
                vaf_bin_count: 10,
            },
            segmentation_stats: SegmentationStats {
                method: SegmentationMethod::Cbs,
                segment_count: 12,
                total_segmentation_time_secs: 1.5,
            },
            total_run_time_secs: 2.0,
        };

        let output_dir = get_scratch_path("run_stats");
        crate::os_utils::create_dir_all(&output_dir, "test output");
        write_run_stats(&output_dir, &run_stats);

        let buf = std::fs::read(output_dir.join(RUN_STATS_FILENAME)).unwrap();
        let run_stats: RunStats = serde_json::from_slice(&buf).unwrap();
        assert_eq!(run_stats.segmentation_stats.segment_count, 12);
        assert_eq!(run_stats.segmentation_stats.method, SegmentationMethod::Cbs);
        assert_eq!(run_stats.input_stats.bin_count, 1000);
    }
}
