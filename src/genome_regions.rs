use std::collections::HashMap;
use std::io::BufRead;

use bio::data_structures::interval_tree::IntervalTree;
use log::info;
use simple_error::{SimpleError, SimpleResult, bail};

use crate::int_range::IntRange;
use crate::os_utils::open_text_reader;

/// Sorted genomic intervals for each chromosome
///
pub type GenomeIntervals = HashMap<String, Vec<IntRange>>;

/// A set of chromosome regions which can be efficiently queried
///
#[derive(Clone)]
pub struct ChromRegions {
    regions: IntervalTree<i64, ()>,
}

impl ChromRegions {
    pub fn new() -> Self {
        Self {
            regions: IntervalTree::new(),
        }
    }

    /// Return true if the start-end range intersects with any regions stored in this object
    ///
    pub fn intersect(&self, start: i64, end: i64) -> bool {
        self.regions.find(start..end).next().is_some()
    }

    /// Adds a region, regions are not collapsed
    ///
    pub fn add_region(&mut self, start: i64, end: i64) {
        self.regions.insert(start..end, ());
    }
}

#[derive(Clone, Default)]
pub struct GenomeRegions {
    pub chroms: HashMap<String, ChromRegions>,
}

impl GenomeRegions {
    pub fn from_intervals(intervals: &GenomeIntervals) -> Self {
        let mut regions = Self::default();
        for (chrom, chrom_intervals) in intervals.iter() {
            for interval in chrom_intervals.iter() {
                regions.add_region(chrom, interval.start, interval.end);
            }
        }
        regions
    }

    /// # Arguments
    /// * `chrom` - the contig string
    /// * `start` - the start coordinate (included)
    /// * `end` - the end coordinates (excluded)
    pub fn add_region(&mut self, chrom: &str, start: i64, end: i64) {
        self.chroms
            .entry(chrom.to_owned())
            .or_insert_with(ChromRegions::new)
            .add_region(start, end);
    }

    /// Return true if [start,end) intersects any region on `chrom`
    ///
    pub fn intersect(&self, chrom: &str, start: i64, end: i64) -> bool {
        self.chroms
            .get(chrom)
            .is_some_and(|x| x.intersect(start, end))
    }
}

fn parse_bed_coordinate(word: &str, label: &str, filename: &str, line_no: usize) -> SimpleResult<i64> {
    word.parse::<i64>().map_err(|_| {
        SimpleError::new(format!(
            "Can't parse coordinate '{word}' on line {line_no} of {label} file: '{filename}'"
        ))
    })
}

/// Read intervals from a bed file, which may optionally be gzip compressed
///
/// Intervals are sorted by start position within each chromosome. Empty intervals are skipped.
///
/// # Arguments
///
/// * `label` - Used in log and error messages to describe what type of regions file this is
///
pub fn read_bed_intervals(filename: &str, label: &str) -> SimpleResult<GenomeIntervals> {
    info!("Reading {label} regions from file '{filename}'");

    let reader = open_text_reader(filename, label)?;

    let mut intervals = GenomeIntervals::new();
    for (line_index, line) in reader.lines().enumerate() {
        let line_no = line_index + 1;
        let line = line.map_err(|e| {
            SimpleError::new(format!("Can't read text from {label} file '{filename}': {e}"))
        })?;
        if line.is_empty() || line.starts_with('#') || line.starts_with("track") {
            continue;
        }

        let words = line.split('\t').collect::<Vec<_>>();
        if words.len() < 3 {
            bail!("Expected at least 3 columns on line {line_no} of {label} file: '{filename}'");
        }
        let start = parse_bed_coordinate(words[1], label, filename, line_no)?;
        let end = parse_bed_coordinate(words[2], label, filename, line_no)?;
        if end <= start {
            continue;
        }
        intervals
            .entry(words[0].to_string())
            .or_default()
            .push(IntRange::from_pair(start, end));
    }

    for chrom_intervals in intervals.values_mut() {
        chrom_intervals.sort();
    }

    Ok(intervals)
}

/// Check that no two intervals on the same chromosome overlap
///
/// Intervals are assumed to be sorted.
///
pub fn check_nonoverlapping_intervals(intervals: &GenomeIntervals, label: &str) -> SimpleResult<()> {
    for (chrom, chrom_intervals) in intervals.iter() {
        for w in chrom_intervals.windows(2) {
            if w[0].intersect_range(&w[1]) {
                bail!(
                    "Overlapping {label} regions are not allowed: {chrom} {:?} {:?}",
                    w[0],
                    w[1]
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os_utils::test_utils::write_text_file;

    #[test]
    fn test_intersect() {
        let mut regions = GenomeRegions::default();
        regions.add_region("chr1", 100, 200);

        assert!(regions.intersect("chr1", 150, 160));
        assert!(regions.intersect("chr1", 0, 101));
        assert!(regions.intersect("chr1", 199, 300));
        assert!(!regions.intersect("chr1", 0, 100));
        assert!(!regions.intersect("chr1", 200, 300));
        assert!(!regions.intersect("chr2", 150, 160));
    }

    #[test]
    fn test_read_bed_intervals() {
        let filename = write_text_file(
            "read_bed_intervals.bed",
            "#header\nchr1\t500\t600\tx\nchr1\t100\t200\nchr2\t5\t5\nchr2\t10\t20\n",
        );
        let intervals = read_bed_intervals(filename.as_str(), "test").unwrap();

        assert_eq!(
            intervals["chr1"],
            vec![IntRange::from_pair(100, 200), IntRange::from_pair(500, 600)]
        );
        assert_eq!(intervals["chr2"], vec![IntRange::from_pair(10, 20)]);
        assert!(check_nonoverlapping_intervals(&intervals, "test").is_ok());

        let regions = GenomeRegions::from_intervals(&intervals);
        assert!(regions.intersect("chr1", 550, 551));
    }

    #[test]
    fn test_overlapping_intervals() {
        let mut intervals = GenomeIntervals::new();
        intervals.insert(
            "chr1".to_string(),
            vec![IntRange::from_pair(10, 20), IntRange::from_pair(19, 30)],
        );
        assert!(check_nonoverlapping_intervals(&intervals, "test").is_err());
    }

    #[test]
    fn test_malformed_bed() {
        let filename = write_text_file("malformed.bed", "chr1\tten\t20\n");
        assert!(read_bed_intervals(filename.as_str(), "test").is_err());
    }
}
