//! Binned coverage and allele frequency input
//!

use std::collections::HashSet;
use std::io::BufRead;

use camino::Utf8Path;
use log::{debug, info, warn};
use simple_error::{SimpleError, SimpleResult, bail};

use crate::genome_regions::GenomeRegions;
use crate::os_utils::open_text_reader;

/// Minimum total allele depth for a variant record to contribute to the allele frequency track
const MIN_VAF_TOTAL_DEPTH: u32 = 10;

/// Minimum number of variant records in a bin for the bin to enter the allele frequency track
const MIN_VAF_RECORDS_PER_BIN: u32 = 2;

/// Allele frequency values for one sample and chromosome
///
/// Only bins with sufficient variant support are represented. `coverage_index[i]` gives the
/// index of the coverage bin that `values[i]` was computed from, and is strictly increasing.
///
#[derive(Clone, Debug, Default)]
pub struct VafTrack {
    pub values: Vec<f64>,
    pub coverage_index: Vec<usize>,
}

/// All retained bins of one chromosome
///
#[derive(Clone, Debug)]
pub struct ChromBins {
    pub chrom: String,
    pub start: Vec<i64>,
    pub end: Vec<i64>,

    /// Coverage scores indexed as `[sample_index][bin_index]`
    pub coverage: Vec<Vec<f64>>,

    /// Allele frequency tracks indexed by sample, empty when no allele frequency input is given
    pub vaf: Vec<VafTrack>,
}

impl ChromBins {
    pub fn new(chrom: &str) -> Self {
        Self {
            chrom: chrom.to_string(),
            start: Vec::new(),
            end: Vec::new(),
            coverage: vec![Vec::new()],
            vaf: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.start.len()
    }

    /// Index of the bin containing the 1-based position `pos`
    fn find_bin(&self, pos: i64) -> Option<usize> {
        let bin_index = self.end.partition_point(|&end| end < pos);
        if bin_index < self.len() && self.start[bin_index] < pos {
            Some(bin_index)
        } else {
            None
        }
    }
}

/// Bins for all samples over the genome, in input chromosome order
///
pub struct GenomeBins {
    pub sample_names: Vec<String>,
    pub chroms: Vec<ChromBins>,
}

impl GenomeBins {
    pub fn sample_count(&self) -> usize {
        self.sample_names.len()
    }

    pub fn bin_count(&self) -> usize {
        self.chroms.iter().map(|x| x.len()).sum()
    }

    pub fn vaf_bin_count(&self) -> usize {
        self.chroms
            .iter()
            .flat_map(|x| x.vaf.iter())
            .map(|x| x.values.len())
            .sum()
    }

    /// Per-sample coverage expected from a single copy: half the average finite bin coverage
    ///
    pub fn get_haploid_means(&self) -> Vec<f64> {
        (0..self.sample_count())
            .map(|sample_index| {
                let (sum, count) = self
                    .chroms
                    .iter()
                    .flat_map(|x| x.coverage[sample_index].iter())
                    .filter(|x| x.is_finite())
                    .fold((0.0, 0usize), |(sum, count), &x| (sum + x, count + 1));
                if count == 0 {
                    0.0
                } else {
                    sum / (count as f64 * 2.0)
                }
            })
            .collect()
    }
}

/// Derive a sample label from the input bin filename
///
fn get_sample_name(filename: &str) -> String {
    let path = Utf8Path::new(filename);
    let name = path.file_name().unwrap_or(filename);
    let name = name.strip_suffix(".gz").unwrap_or(name);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

fn parse_field<T: std::str::FromStr>(
    word: &str,
    field: &str,
    filename: &str,
    line_no: usize,
) -> SimpleResult<T> {
    word.parse::<T>().map_err(|_| {
        SimpleError::new(format!(
            "Can't parse {field} value '{word}' on line {line_no} of file: '{filename}'"
        ))
    })
}

/// Read bins for one sample
///
/// Bins intersecting any forbidden region are dropped. Input must be grouped by chromosome and
/// sorted by start position, without overlapping bins.
///
fn read_sample_bins(
    filename: &str,
    forbidden_regions: Option<&GenomeRegions>,
) -> SimpleResult<Vec<ChromBins>> {
    info!("Reading coverage bins from file '{filename}'");

    let reader = open_text_reader(filename, "coverage bins")?;

    let mut chroms: Vec<ChromBins> = Vec::new();
    let mut seen_chroms = HashSet::new();
    let mut last_start = 0;
    let mut last_end = 0;
    let mut filtered_count = 0;

    for (line_index, line) in reader.lines().enumerate() {
        let line_no = line_index + 1;
        let line = line.map_err(|e| {
            SimpleError::new(format!("Can't read text from coverage bins file '{filename}': {e}"))
        })?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let words = line.split('\t').collect::<Vec<_>>();
        if words.len() < 4 {
            bail!("Expected at least 4 columns on line {line_no} of coverage bins file: '{filename}'");
        }
        let chrom = words[0];
        let start = parse_field::<i64>(words[1], "start", filename, line_no)?;
        let end = parse_field::<i64>(words[2], "end", filename, line_no)?;
        let score = parse_field::<f64>(words[3], "score", filename, line_no)?;

        if start < 0 || end <= start {
            bail!("Invalid bin range {start}-{end} on line {line_no} of coverage bins file: '{filename}'");
        }

        let is_new_chrom = chroms.last().is_none_or(|x| x.chrom != chrom);
        if is_new_chrom {
            if !seen_chroms.insert(chrom.to_string()) {
                bail!(
                    "Coverage bins are not grouped by chromosome, '{chrom}' reappears on line {line_no} of file: '{filename}'"
                );
            }
            chroms.push(ChromBins::new(chrom));
        } else {
            if start < last_start {
                bail!(
                    "Coverage bins are not sorted, {chrom}:{start} follows {chrom}:{last_start} on line {line_no} of file: '{filename}'"
                );
            }
            if start < last_end {
                bail!(
                    "Coverage bins overlap, {chrom}:{start}-{end} overlaps the preceding bin on line {line_no} of file: '{filename}'"
                );
            }
        }
        last_start = start;
        last_end = end;

        if let Some(forbidden_regions) = forbidden_regions
            && forbidden_regions.intersect(chrom, start, end)
        {
            filtered_count += 1;
            continue;
        }

        let chrom_bins = chroms.last_mut().unwrap();
        chrom_bins.start.push(start);
        chrom_bins.end.push(end);
        chrom_bins.coverage[0].push(score);
    }

    if filtered_count > 0 {
        info!("Dropped {filtered_count} bins intersecting forbidden regions in file '{filename}'");
    }

    Ok(chroms)
}

/// Add the coverage of another sample to the genome bins, checking that the bin layouts match
///
fn add_sample_bins(
    chroms: &mut [ChromBins],
    sample_chroms: Vec<ChromBins>,
    filename: &str,
) -> SimpleResult<()> {
    if chroms.len() != sample_chroms.len() {
        bail!("Coverage bins file '{filename}' has a different chromosome count than the first sample");
    }
    for (chrom_bins, mut sample_chrom_bins) in chroms.iter_mut().zip(sample_chroms) {
        if chrom_bins.chrom != sample_chrom_bins.chrom
            || chrom_bins.start != sample_chrom_bins.start
            || chrom_bins.end != sample_chrom_bins.end
        {
            bail!(
                "Coverage bins file '{filename}' does not match the bin layout of the first sample on chromosome '{}'",
                sample_chrom_bins.chrom
            );
        }
        chrom_bins
            .coverage
            .push(std::mem::take(&mut sample_chrom_bins.coverage[0]));
    }
    Ok(())
}

/// Read an allele frequency sidecar for one sample and attach it to the genome bins
///
/// Each record is assigned to the bin containing its 1-based position, and contributes its major
/// allele frequency. Bins with at least two contributing records enter the track with the mean
/// of their records.
///
fn read_sample_vaf(chroms: &mut [ChromBins], filename: &str) -> SimpleResult<()> {
    info!("Reading allele frequencies from file '{filename}'");

    let reader = open_text_reader(filename, "allele frequency")?;

    let mut vaf_sums = chroms
        .iter()
        .map(|x| vec![(0.0, 0u32); x.len()])
        .collect::<Vec<_>>();
    let mut chrom_index = None;
    let mut last_chrom = String::new();
    let mut skipped_count = 0;

    for (line_index, line) in reader.lines().enumerate() {
        let line_no = line_index + 1;
        let line = line.map_err(|e| {
            SimpleError::new(format!("Can't read text from allele frequency file '{filename}': {e}"))
        })?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let words = line.split('\t').collect::<Vec<_>>();
        if words.len() < 6 {
            warn!("Skipping allele frequency record with fewer than 6 columns on line {line_no} of file: '{filename}'");
            continue;
        }

        if words[0] != last_chrom {
            last_chrom = words[0].to_string();
            chrom_index = chroms.iter().position(|x| x.chrom == last_chrom);
        }
        let Some(chrom_index) = chrom_index else {
            skipped_count += 1;
            continue;
        };

        let pos = parse_field::<i64>(words[1], "position", filename, line_no)?;
        let ref_count = parse_field::<u32>(words[4], "reference allele count", filename, line_no)?;
        let alt_count = parse_field::<u32>(words[5], "alternate allele count", filename, line_no)?;
        let total = ref_count + alt_count;
        if total < MIN_VAF_TOTAL_DEPTH {
            continue;
        }

        if let Some(bin_index) = chroms[chrom_index].find_bin(pos) {
            let major_allele_freq = std::cmp::max(ref_count, alt_count) as f64 / total as f64;
            let entry = &mut vaf_sums[chrom_index][bin_index];
            entry.0 += major_allele_freq;
            entry.1 += 1;
        }
    }

    if skipped_count > 0 {
        debug!("Skipped {skipped_count} allele frequency records on chromosomes without bins in file '{filename}'");
    }

    for (chrom_bins, chrom_vaf_sums) in chroms.iter_mut().zip(vaf_sums) {
        let mut track = VafTrack::default();
        for (bin_index, (sum, count)) in chrom_vaf_sums.into_iter().enumerate() {
            if count >= MIN_VAF_RECORDS_PER_BIN {
                track.values.push(sum / count as f64);
                track.coverage_index.push(bin_index);
            }
        }
        chrom_bins.vaf.push(track);
    }

    Ok(())
}

/// Read coverage bins for all samples, plus optional allele frequency input
///
/// # Arguments
/// * `vaf_filenames` - Either empty, or one allele frequency file for each coverage bins file
///
pub fn read_genome_bins(
    bins_filenames: &[String],
    vaf_filenames: &[String],
    forbidden_regions: Option<&GenomeRegions>,
) -> SimpleResult<GenomeBins> {
    assert!(!bins_filenames.is_empty());
    assert!(vaf_filenames.is_empty() || vaf_filenames.len() == bins_filenames.len());

    let mut chroms = read_sample_bins(&bins_filenames[0], forbidden_regions)?;
    for filename in bins_filenames.iter().skip(1) {
        let sample_chroms = read_sample_bins(filename, forbidden_regions)?;
        add_sample_bins(&mut chroms, sample_chroms, filename)?;
    }

    for filename in vaf_filenames.iter() {
        read_sample_vaf(&mut chroms, filename)?;
    }

    let mut sample_names = Vec::new();
    for (sample_index, filename) in bins_filenames.iter().enumerate() {
        let mut name = get_sample_name(filename);
        if sample_names.contains(&name) {
            name = format!("{name}_{}", sample_index + 1);
        }
        sample_names.push(name);
    }

    let genome_bins = GenomeBins {
        sample_names,
        chroms,
    };

    info!(
        "Read {} bins on {} chromosomes for {} samples",
        genome_bins.bin_count(),
        genome_bins.chroms.len(),
        genome_bins.sample_count()
    );

    Ok(genome_bins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os_utils::test_utils::write_text_file;

    fn bins_text() -> String {
        let mut text = String::from("#chrom\tstart\tend\tscore\n");
        for i in 0..5 {
            text += &format!("chr1\t{}\t{}\t{}\n", i * 100, (i + 1) * 100, 10 + i);
        }
        text += "chr2\t0\t100\tNaN\nchr2\t100\t200\t4\n";
        text
    }

    #[test]
    fn test_get_sample_name() {
        assert_eq!(get_sample_name("/a/b/sample1.bins.tsv.gz"), "sample1.bins");
        assert_eq!(get_sample_name("sample2.txt"), "sample2");
        assert_eq!(get_sample_name("sample3"), "sample3");
    }

    #[test]
    fn test_read_genome_bins() {
        let filename = write_text_file("read_genome_bins.tsv", &bins_text());
        let mut forbidden = GenomeRegions::default();
        forbidden.add_region("chr1", 150, 160);

        let genome_bins =
            read_genome_bins(&[filename.to_string()], &[], Some(&forbidden)).unwrap();
        assert_eq!(genome_bins.chroms.len(), 2);

        let chr1 = &genome_bins.chroms[0];
        assert_eq!(chr1.start, vec![0, 200, 300, 400]);
        assert_eq!(chr1.coverage[0], vec![10.0, 12.0, 13.0, 14.0]);

        let chr2 = &genome_bins.chroms[1];
        assert!(chr2.coverage[0][0].is_nan());

        // Finite bins: 10,12,13,14,4 -> mean 10.6
        approx::assert_abs_diff_eq!(genome_bins.get_haploid_means()[0], 5.3, epsilon = 1e-12);
    }

    #[test]
    fn test_unsorted_bins() {
        let filename = write_text_file(
            "unsorted_bins.tsv",
            "chr1\t100\t200\t1\nchr1\t0\t100\t1\n",
        );
        assert!(read_genome_bins(&[filename.to_string()], &[], None).is_err());

        let filename = write_text_file(
            "overlapping_bins.tsv",
            "chr1\t0\t150\t1\nchr1\t100\t200\t1\n",
        );
        assert!(read_genome_bins(&[filename.to_string()], &[], None).is_err());

        let filename = write_text_file(
            "ungrouped_bins.tsv",
            "chr1\t0\t100\t1\nchr2\t0\t100\t1\nchr1\t100\t200\t1\n",
        );
        assert!(read_genome_bins(&[filename.to_string()], &[], None).is_err());
    }

    #[test]
    fn test_multi_sample_layout_mismatch() {
        let f1 = write_text_file("layout_a.tsv", "chr1\t0\t100\t1\nchr1\t100\t200\t1\n");
        let f2 = write_text_file("layout_b.tsv", "chr1\t0\t100\t3\nchr1\t100\t200\t4\n");
        let f3 = write_text_file("layout_c.tsv", "chr1\t0\t100\t1\nchr1\t100\t250\t1\n");

        let genome_bins =
            read_genome_bins(&[f1.to_string(), f2.to_string()], &[], None).unwrap();
        assert_eq!(genome_bins.sample_count(), 2);
        assert_eq!(genome_bins.chroms[0].coverage[1], vec![3.0, 4.0]);

        assert!(read_genome_bins(&[f1.to_string(), f3.to_string()], &[], None).is_err());
    }

    #[test]
    fn test_read_vaf() {
        let bins = write_text_file("vaf_bins.tsv", &bins_text());
        let vaf = write_text_file(
            "vaf_records.tsv",
            "\
chr1\t150\tA\tG\t10\t30
chr1\t160\tA\tG\t20\t20
chr1\t250\tA\tG\t20\t20
chr1\t260\tA\tG\t2\t2
chr1\t300\tA\tG\t5\t15
chr1\t301\tA\tG\t15\t5
chr1\t302\tshort
chrX\t10\tA\tG\t10\t10
",
        );

        let genome_bins =
            read_genome_bins(&[bins.to_string()], &[vaf.to_string()], None).unwrap();
        let track = &genome_bins.chroms[0].vaf[0];

        // Bin 1 has records (0.75, 0.5). Bin 2 has (0.5, 0.75) after the depth filter, because
        // 1-based position 300 is the last base of bin 2. Bin 3 has a single record.
        assert_eq!(track.coverage_index, vec![1, 2]);
        approx::assert_abs_diff_eq!(track.values[0], 0.625, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(track.values[1], 0.625, epsilon = 1e-12);

        assert!(genome_bins.chroms[1].vaf[0].values.is_empty());
        assert_eq!(genome_bins.vaf_bin_count(), 2);
    }
}
