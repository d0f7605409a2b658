//! Top-level segmentation run: read inputs, segment all chromosomes and write results
//!

use std::time::Instant;

use log::info;
use simple_error::SimpleResult;

use crate::cli;
use crate::genome_regions::{
    GenomeIntervals, GenomeRegions, check_nonoverlapping_intervals, read_bed_intervals,
};
use crate::genomic_bins::read_genome_bins;
use crate::run_stats::{InputStats, RunStats, write_run_stats};
use crate::segment_output::{
    get_genome_segment_indexes, serialize_segments, write_partitioned_files, write_segments_bed,
};
use crate::segmentation::segment_genome;

fn read_optional_intervals(filename: Option<&String>, label: &str) -> SimpleResult<Option<GenomeIntervals>> {
    filename.map(|x| read_bed_intervals(x, label)).transpose()
}

pub fn run_partition(settings: &cli::Settings) -> SimpleResult<()> {
    let start = Instant::now();
    let shared_settings = &settings.shared;
    let segment_settings = &settings.segment;
    let output_dir = &segment_settings.output_dir;

    cli::write_settings(output_dir, settings);

    let forbidden_intervals = read_optional_intervals(
        segment_settings.forbidden_regions_filename.as_ref(),
        "forbidden",
    )?;
    let forbidden_regions = forbidden_intervals.as_ref().map(GenomeRegions::from_intervals);

    let common_cnvs =
        read_optional_intervals(segment_settings.common_cnvs_filename.as_ref(), "common CNV")?;
    if let Some(common_cnvs) = &common_cnvs {
        check_nonoverlapping_intervals(common_cnvs, "common CNV")?;
    }

    let genome_bins = read_genome_bins(
        &segment_settings.bins_filenames,
        &segment_settings.vaf_filenames,
        forbidden_regions.as_ref(),
    )?;

    let mut run_stats = RunStats {
        input_stats: InputStats::new(&genome_bins),
        ..Default::default()
    };

    let params = segment_settings.get_segmentation_params();
    let segmentation_start = Instant::now();
    let genome_segments = segment_genome(
        &genome_bins,
        common_cnvs.as_ref(),
        &params,
        shared_settings.thread_count,
    )?;
    run_stats.set_segmentation_stats(
        params.method,
        &genome_segments,
        segmentation_start.elapsed().as_secs_f64(),
    );

    info!("Writing segmentation output");
    let genome_segment_indexes = get_genome_segment_indexes(
        &genome_bins,
        &genome_segments,
        forbidden_intervals.as_ref(),
        segment_settings.max_inter_bin_dist,
    );
    write_partitioned_files(output_dir, &genome_bins, &genome_segment_indexes);
    write_segments_bed(output_dir, &genome_segments);
    serialize_segments(output_dir, &genome_segments);

    run_stats.total_run_time_secs = start.elapsed().as_secs_f64();
    write_run_stats(output_dir, &run_stats);

    Ok(())
}
