//! Utilities pertaining to filesystem access
//!

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

use camino::Utf8Path;
use flate2::{Compression, read::MultiGzDecoder, write::GzEncoder};
use simple_error::{SimpleError, SimpleResult};
use unwrap::unwrap;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Create a novel directory path if it does not exist already
///
/// If the directory already exists no operations are performed
///
/// * `label` - used to describe the error directory in an error message
///
pub fn create_dir_all(dir: &Utf8Path, label: &str) {
    if !dir.is_dir() {
        match std::fs::create_dir_all(dir) {
            Ok(_) => {}
            Err(e) => {
                panic!("Can't create new {} directory at '{}': {}", label, dir, e);
            }
        }
    }
}

/// Open a text input file which may optionally be gzip compressed
///
/// Compression is detected from the file content rather than the filename.
///
/// * `label` - used to describe the file in an error message
///
pub fn open_text_reader(filename: &str, label: &str) -> SimpleResult<Box<dyn BufRead>> {
    let file = File::open(filename).map_err(|e| {
        SimpleError::new(format!("Unable to open {label} file '{filename}': {e}"))
    })?;
    let mut reader = BufReader::new(file);
    let is_gzip = reader
        .fill_buf()
        .map_err(|e| SimpleError::new(format!("Unable to read {label} file '{filename}': {e}")))?
        .starts_with(&GZIP_MAGIC);

    if is_gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Create a text output file, gzip compressed if the filename ends in '.gz'
///
pub fn create_text_writer(filename: &Utf8Path, label: &str) -> Box<dyn Write> {
    let f = unwrap!(
        File::create(filename),
        "Unable to create {label} file: '{filename}'"
    );
    if filename.as_str().ends_with(".gz") {
        Box::new(BufWriter::new(GzEncoder::new(f, Compression::default())))
    } else {
        Box::new(BufWriter::new(f))
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use std::io::Read;

    #[test]
    fn test_plain_and_gzip_round_trip() {
        let content = "chr1\t0\t100\n";

        let plain = write_text_file("plain_round_trip.txt", content);
        let mut text = String::new();
        open_text_reader(plain.as_str(), "test")
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, content);

        let gz = get_scratch_path("gzip_round_trip.txt.gz");
        {
            let mut w = create_text_writer(&gz, "test");
            w.write_all(content.as_bytes()).unwrap();
        }
        let mut text = String::new();
        open_text_reader(gz.as_str(), "test")
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, content);
    }

    #[test]
    fn test_missing_file() {
        assert!(open_text_reader("/nonexistent/cnvseg/input.txt", "test").is_err());
    }
}
