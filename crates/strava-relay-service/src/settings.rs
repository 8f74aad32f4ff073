//! Layered configuration loading.
//!
//! Sources are applied in order, later sources overriding earlier ones:
//!  1. `/etc/strava-relay/service.yaml`: system-wide defaults
//!  2. `./config/service.yaml`: deployment-local override
//!  3. the file named by `SR_CONFIG_FILE`: operator-specified, must exist
//!  4. environment variables prefixed `SR__` with `__` as the separator,
//!     e.g. `SR__STRAVA__VERIFY_TOKEN=...` sets `strava.verify_token`
//!
//! Absent files are fine because every field has a default. A malformed file
//! or a value that cannot be coerced to its field type is an error.

use strava_relay_api::{ConfigError, ServiceConfig};
use tracing::info;

pub const SYSTEM_CONFIG_PATH: &str = "/etc/strava-relay/service";
pub const LOCAL_CONFIG_PATH: &str = "config/service";
pub const CONFIG_FILE_ENV: &str = "SR_CONFIG_FILE";
pub const ENV_PREFIX: &str = "SR";

/// Load and validate the service configuration.
pub fn load_service_config() -> Result<ServiceConfig, ConfigError> {
    let explicit_path = std::env::var(CONFIG_FILE_ENV)
        .ok()
        .filter(|path| !path.is_empty());

    let config = build_config(
        &[SYSTEM_CONFIG_PATH, LOCAL_CONFIG_PATH],
        explicit_path.as_deref(),
        Some(ENV_PREFIX),
    )?;
    config.validate()?;
    Ok(config)
}

/// Merge the given sources into a [`ServiceConfig`] without validating it.
pub fn build_config(
    optional_files: &[&str],
    required_file: Option<&str>,
    env_prefix: Option<&str>,
) -> Result<ServiceConfig, ConfigError> {
    let mut builder = config::Config::builder();

    for path in optional_files {
        builder = builder.add_source(
            config::File::with_name(path)
                .required(false)
                .format(config::FileFormat::Yaml),
        );
    }

    if let Some(path) = required_file {
        info!(path = %path, "Loading configuration from explicit path");
        builder = builder.add_source(
            config::File::with_name(path)
                .required(true)
                .format(config::FileFormat::Yaml),
        );
    }

    if let Some(prefix) = env_prefix {
        builder = builder.add_source(config::Environment::with_prefix(prefix).separator("__"));
    }

    builder
        .build()
        .and_then(|config| config.try_deserialize())
        .map_err(|e| ConfigError::Parsing {
            message: e.to_string(),
        })
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
