use std::path::Path;

use simple_error::{SimpleResult, bail};

/// Check that an input path names an existing regular file
///
fn check_input_file(filename: &str, label: &str) -> SimpleResult<()> {
    let path = Path::new(filename);
    if !path.exists() {
        bail!("Can't find specified {label} file: '{filename}'");
    }
    if !path.is_file() {
        bail!("Specified {label} file path does not appear to be a file: '{filename}'");
    }
    Ok(())
}

/// Check the files given by a repeatable per-sample input option
///
/// At least one file is required. Assumes no logger has been configured yet.
///
pub fn check_sample_file_list(filenames: &[String], option: &str, label: &str) -> SimpleResult<()> {
    if filenames.is_empty() {
        bail!("Must specify at least one {option} file");
    }
    for filename in filenames.iter() {
        if filename.is_empty() {
            bail!("Empty {label} filename given to {option}");
        }
        check_input_file(filename, label)?;
    }
    Ok(())
}

/// Check an optional per-sample input list, which must either be empty or match the sample count
/// of the primary list
///
pub fn check_optional_sample_file_list(
    filenames: &[String],
    option: &str,
    label: &str,
    sample_count: usize,
    sample_option: &str,
) -> SimpleResult<()> {
    if filenames.is_empty() {
        return Ok(());
    }
    if filenames.len() != sample_count {
        bail!(
            "Number of {option} files ({}) does not match the number of {sample_option} files ({sample_count})",
            filenames.len()
        );
    }
    check_sample_file_list(filenames, option, label)
}

/// Check an optional genome-wide region file
///
pub fn check_optional_region_file(filename: Option<&String>, label: &str) -> SimpleResult<()> {
    match filename {
        Some(filename) => check_input_file(filename, label),
        None => Ok(()),
    }
}
