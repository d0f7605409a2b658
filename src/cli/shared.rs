use clap::Args;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail};

#[derive(Args, Default, Deserialize, Serialize)]
pub struct SharedSettings {
    /// Number of threads to use. Defaults to all logical cpus detected.
    #[arg(long = "threads", value_name = "THREAD_COUNT")]
    #[serde(skip)]
    thread_count_option: Option<usize>,

    /// This value will be filled in by thread_count_option
    #[arg(hide = true, long, default_value_t = 0)]
    pub thread_count: usize,

    /// Overwrite an existing output directory
    #[arg(long)]
    pub clobber: bool,

    /// Turn on extra debug logging
    ///
    /// This option enables per-chromosome segmentation details in the log.
    ///
    #[arg(long)]
    pub debug: bool,
}

pub fn validate_and_fix_shared_settings(
    mut settings: SharedSettings,
) -> SimpleResult<SharedSettings> {
    settings.thread_count = match settings.thread_count_option {
        Some(count) => {
            if count == 0 {
                bail!("--threads argument must be greater than 0");
            }
            count
        }
        None => num_cpus::get(),
    };

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_count() {
        let settings = validate_and_fix_shared_settings(SharedSettings::default()).unwrap();
        assert!(settings.thread_count > 0);

        let settings = SharedSettings {
            thread_count_option: Some(3),
            ..Default::default()
        };
        assert_eq!(validate_and_fix_shared_settings(settings).unwrap().thread_count, 3);

        let settings = SharedSettings {
            thread_count_option: Some(0),
            ..Default::default()
        };
        assert!(validate_and_fix_shared_settings(settings).is_err());
    }
}
