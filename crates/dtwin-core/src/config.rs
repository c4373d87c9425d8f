//! Layered settings loading for dtwin binaries.
//!
//! Settings are loaded from (in priority order):
//! 1. Environment variables (`DTWIN__` prefix, `__` separates sections)
//! 2. Config file (`dtwin.toml`, or any prefix passed on the command line)
//! 3. Defaults supplied by each section's `Default` impl

use serde::de::DeserializeOwned;

use crate::error::CoreError;

/// Default config file prefix (resolves to `dtwin.toml`, `dtwin.yaml`, ...).
pub const DEFAULT_FILE_PREFIX: &str = "dtwin";

/// Environment variable prefix, e.g. `DTWIN__SERVICE__ENDPOINT`.
pub const ENV_PREFIX: &str = "DTWIN";

/// Build the layered settings tree. A missing config file is not an error.
pub fn load_settings(file_prefix: &str) -> Result<config::Config, CoreError> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    Ok(cfg)
}

/// Deserialize one top-level section, falling back to its defaults when the
/// section is absent. A present but malformed section is an error.
pub fn section<T>(settings: &config::Config, key: &str) -> Result<T, CoreError>
where
    T: DeserializeOwned + Default,
{
    match settings.get::<T>(key) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => {
            tracing::debug!(section = key, "Section not configured, using defaults");
            Ok(T::default())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default = "default_name")]
        name: String,
        #[serde(default)]
        count: u32,
    }

    fn default_name() -> String {
        "sample".to_string()
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                name: default_name(),
                count: 0,
            }
        }
    }

    #[test]
    fn missing_file_and_section_yield_defaults() {
        let settings = load_settings("/nonexistent/dtwin-settings").unwrap();
        let sample: Sample = section(&settings, "sample").unwrap();
        assert_eq!(sample, Sample::default());
    }

    #[test]
    fn reads_section_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[sample]\nname = \"from-file\"\ncount = 7").unwrap();

        let settings = load_settings(file.path().to_str().unwrap()).unwrap();
        let sample: Sample = section(&settings, "sample").unwrap();
        assert_eq!(sample.name, "from-file");
        assert_eq!(sample.count, 7);
    }

    #[test]
    fn malformed_section_is_an_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[sample]\ncount = \"many\"").unwrap();

        let settings = load_settings(file.path().to_str().unwrap()).unwrap();
        let result: Result<Sample, _> = section(&settings, "sample");
        assert!(matches!(result, Err(CoreError::Config(_))));
    }
}
