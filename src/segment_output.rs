//! Write segmentation results
//!

use std::collections::HashSet;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use log::info;
use serde::Serialize;
use unwrap::unwrap;

use crate::genome_regions::GenomeIntervals;
use crate::genomic_bins::{ChromBins, GenomeBins};
use crate::int_range::IntRange;
use crate::os_utils::create_text_writer;
use crate::segments::GenomeSegments;

pub const PARTITIONED_FILENAME_SUFFIX: &str = ".partitioned.tsv.gz";
pub const SEGMENTS_BED_FILENAME: &str = "segments.bed";
pub const SEGMENTS_MESSAGEPACK_FILENAME: &str = "segments.msgpack";

/// Assign a segment index to every bin of one chromosome
///
/// A new segment starts at any bin which:
/// - starts at a segment start
/// - is the first bin past the midpoint of an excluded interval
/// - starts more than `max_inter_bin_dist` after the end of the previous bin, if
///   `max_inter_bin_dist` is not negative
///
/// # Arguments
/// * `segment_starts` - Start positions of all segments on this chromosome
/// * `excluded_intervals` - Sorted excluded intervals on this chromosome
/// * `last_segment_index` - Index of the last segment on the previous chromosome, -1 for the first
///   chromosome
///
fn get_chrom_segment_indexes(
    chrom_bins: &ChromBins,
    segment_starts: &HashSet<i64>,
    excluded_intervals: &[IntRange],
    max_inter_bin_dist: i64,
    last_segment_index: i64,
) -> Vec<i64> {
    let mut segment_index = last_segment_index;
    let mut exclude_index = 0;
    let mut previous_bin_end = 0;
    let mut segment_indexes = Vec::with_capacity(chrom_bins.len());
    for (&start, &end) in chrom_bins.start.iter().zip(chrom_bins.end.iter()) {
        let mut is_new_segment = segment_starts.contains(&start);

        // Skip excluded intervals which end before the previous bin
        while exclude_index < excluded_intervals.len()
            && excluded_intervals[exclude_index].end < previous_bin_end
        {
            exclude_index += 1;
        }
        if let Some(interval) = excluded_intervals.get(exclude_index) {
            let mid = interval.center();
            if previous_bin_end < mid && end >= mid {
                is_new_segment = true;
            }
        }

        if previous_bin_end > 0 && max_inter_bin_dist >= 0 && previous_bin_end + max_inter_bin_dist < start
        {
            is_new_segment = true;
        }

        // The first bin always starts a segment
        if is_new_segment || (segment_indexes.is_empty() && segment_index < 0) {
            segment_index += 1;
        }
        segment_indexes.push(segment_index);
        previous_bin_end = end;
    }
    segment_indexes
}

/// Segment index of every bin in the genome, indexed as `[chrom_index][bin_index]`
///
pub fn get_genome_segment_indexes(
    genome_bins: &GenomeBins,
    genome_segments: &GenomeSegments,
    excluded_intervals: Option<&GenomeIntervals>,
    max_inter_bin_dist: i64,
) -> Vec<Vec<i64>> {
    assert_eq!(genome_bins.chroms.len(), genome_segments.chroms.len());

    let mut last_segment_index = -1;
    let mut genome_segment_indexes = Vec::new();
    for (chrom_bins, chrom_segments) in genome_bins.chroms.iter().zip(genome_segments.chroms.iter()) {
        assert_eq!(chrom_bins.chrom, chrom_segments.chrom);
        let segment_starts = chrom_segments
            .segments
            .iter()
            .map(|x| x.start)
            .collect::<HashSet<_>>();
        let chrom_excluded_intervals = excluded_intervals
            .and_then(|x| x.get(&chrom_bins.chrom))
            .map(|x| x.as_slice())
            .unwrap_or_default();
        let chrom_segment_indexes = get_chrom_segment_indexes(
            chrom_bins,
            &segment_starts,
            chrom_excluded_intervals,
            max_inter_bin_dist,
            last_segment_index,
        );
        if let Some(&x) = chrom_segment_indexes.last() {
            last_segment_index = x;
        }
        genome_segment_indexes.push(chrom_segment_indexes);
    }
    genome_segment_indexes
}

pub fn get_partitioned_filename(output_dir: &Utf8Path, sample_name: &str) -> Utf8PathBuf {
    output_dir.join(format!("{sample_name}{PARTITIONED_FILENAME_SUFFIX}"))
}

/// Write every retained bin for each sample with its score and segment index
///
pub fn write_partitioned_files(
    output_dir: &Utf8Path,
    genome_bins: &GenomeBins,
    genome_segment_indexes: &[Vec<i64>],
) {
    for (sample_index, sample_name) in genome_bins.sample_names.iter().enumerate() {
        let filename = get_partitioned_filename(output_dir, sample_name);
        info!("Writing partitioned bins for sample '{sample_name}' to file: '{filename}'");

        let mut f = create_text_writer(&filename, "partitioned bins");
        for (chrom_bins, chrom_segment_indexes) in
            genome_bins.chroms.iter().zip(genome_segment_indexes.iter())
        {
            for bin_index in 0..chrom_bins.len() {
                writeln!(
                    f,
                    "{}\t{}\t{}\t{}\t{}",
                    chrom_bins.chrom,
                    chrom_bins.start[bin_index],
                    chrom_bins.end[bin_index],
                    chrom_bins.coverage[sample_index][bin_index],
                    chrom_segment_indexes[bin_index]
                )
                .unwrap();
            }
        }
        f.flush().unwrap();
    }
}

/// Write all segments in bed format
///
pub fn write_segments_bed(output_dir: &Utf8Path, genome_segments: &GenomeSegments) {
    let filename = output_dir.join(SEGMENTS_BED_FILENAME);
    info!("Writing segments to bed file: '{filename}'");

    let mut f = create_text_writer(&filename, "segments bed");
    for chrom_segments in genome_segments.chroms.iter() {
        for segment in chrom_segments.segments.iter() {
            writeln!(f, "{}\t{}\t{}", chrom_segments.chrom, segment.start, segment.end).unwrap();
        }
    }
    f.flush().unwrap();
}

/// Serialize segments to file for downstream tools
pub fn serialize_segments(output_dir: &Utf8Path, genome_segments: &GenomeSegments) {
    let mut buf = Vec::new();
    genome_segments
        .serialize(&mut rmp_serde::Serializer::new(&mut buf))
        .unwrap();

    let filename = output_dir.join(SEGMENTS_MESSAGEPACK_FILENAME);

    info!("Writing segments to binary file: '{filename}'");

    unwrap!(
        std::fs::write(&filename, buf.as_slice()),
        "Unable to open and write segments to binary file: '{filename}'"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os_utils::open_text_reader;
    use crate::os_utils::test_utils::get_scratch_path;
    use crate::segments::{ChromSegments, Segment};
    use std::io::BufRead;

    fn get_test_chrom(chrom: &str, start: Vec<i64>) -> ChromBins {
        let mut chrom_bins = ChromBins::new(chrom);
        chrom_bins.end = start.iter().map(|x| x + 100).collect();
        chrom_bins.coverage = vec![start.iter().map(|&x| x as f64 / 100.0).collect()];
        chrom_bins.start = start;
        chrom_bins
    }

    fn get_test_data() -> (GenomeBins, GenomeSegments) {
        let genome_bins = GenomeBins {
            sample_names: vec!["sample1".to_string()],
            chroms: vec![
                get_test_chrom("chr1", vec![0, 100, 200, 300, 600, 700, 5000, 5100]),
                get_test_chrom("chr2", vec![0, 100]),
            ],
        };
        let genome_segments = GenomeSegments {
            chroms: vec![
                ChromSegments {
                    chrom: "chr1".to_string(),
                    segments: vec![
                        Segment { start: 0, end: 200 },
                        Segment {
                            start: 200,
                            end: 5200,
                        },
                    ],
                },
                ChromSegments {
                    chrom: "chr2".to_string(),
                    segments: vec![Segment { start: 0, end: 200 }],
                },
            ],
        };
        (genome_bins, genome_segments)
    }

    #[test]
    fn test_segment_indexes() {
        let (genome_bins, genome_segments) = get_test_data();

        // Excluded interval 400-600 has midpoint 500, between bins 300-400 and 600-700
        let mut excluded = GenomeIntervals::new();
        excluded.insert("chr1".to_string(), vec![IntRange::from_pair(400, 600)]);

        let indexes = get_genome_segment_indexes(&genome_bins, &genome_segments, Some(&excluded), 1000);
        assert_eq!(indexes[0], vec![0, 0, 1, 1, 2, 2, 3, 3]);
        assert_eq!(indexes[1], vec![4, 4]);

        // Without exclusions, and with the distance rule disabled
        let indexes = get_genome_segment_indexes(&genome_bins, &genome_segments, None, -1);
        assert_eq!(indexes[0], vec![0, 0, 1, 1, 1, 1, 1, 1]);
        assert_eq!(indexes[1], vec![2, 2]);
    }

    #[test]
    fn test_first_bin_starts_segment() {
        // Segment starts which don't match the first bin still yield index 0 for that bin
        let chrom_bins = get_test_chrom("chr1", vec![50, 150]);
        let indexes = get_chrom_segment_indexes(&chrom_bins, &HashSet::new(), &[], -1, -1);
        assert_eq!(indexes, vec![0, 0]);
    }

    #[test]
    fn test_write_outputs() {
        let (genome_bins, genome_segments) = get_test_data();
        let output_dir = get_scratch_path("segment_output");
        crate::os_utils::create_dir_all(&output_dir, "test output");

        let indexes = get_genome_segment_indexes(&genome_bins, &genome_segments, None, -1);
        write_partitioned_files(&output_dir, &genome_bins, &indexes);
        let filename = get_partitioned_filename(&output_dir, "sample1");
        let lines = open_text_reader(filename.as_str(), "test")
            .unwrap()
            .lines()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[2], "chr1\t200\t300\t2\t1");
        assert_eq!(lines[9], "chr2\t100\t200\t1\t2");

        write_segments_bed(&output_dir, &genome_segments);
        let bed = std::fs::read_to_string(output_dir.join(SEGMENTS_BED_FILENAME)).unwrap();
        assert_eq!(bed, "chr1\t0\t200\nchr1\t200\t5200\nchr2\t0\t200\n");

        serialize_segments(&output_dir, &genome_segments);
        let buf = std::fs::read(output_dir.join(SEGMENTS_MESSAGEPACK_FILENAME)).unwrap();
        let segments: GenomeSegments = rmp_serde::from_slice(&buf).unwrap();
        assert_eq!(segments.segment_count(), 3);
    }
}
