use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SociError};
use crate::log::LogFormat;

/// Environment variable naming the parent directory for scratch workspaces.
pub const ENV_SCRATCH_DIR: &str = "SOCI_WRAPPER_SCRATCH_DIR";

/// Environment variable holding the invocation deadline in seconds.
pub const ENV_TIMEOUT_SECS: &str = "SOCI_WRAPPER_TIMEOUT_SECS";

/// Environment variable selecting the log output format.
pub const ENV_LOG_FORMAT: &str = "SOCI_WRAPPER_LOG_FORMAT";

/// AWS region override honoured by credential and endpoint resolution.
pub const ENV_AWS_REGION: &str = "AWS_REGION";

/// Default parent directory for scratch workspaces.
pub const DEFAULT_SCRATCH_DIR: &str = "/tmp";

/// Wrapper configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WrapperConfig {
    /// Parent directory under which each invocation provisions its workspace
    pub scratch_root: PathBuf,

    /// Deadline after which the pipeline is cancelled
    pub timeout: Option<Duration>,

    /// Log output format
    pub log_format: LogFormat,

    /// Region override taken from `AWS_REGION`
    pub region_override: Option<String>,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            scratch_root: PathBuf::from(DEFAULT_SCRATCH_DIR),
            timeout: None,
            log_format: LogFormat::Text,
            region_override: None,
        }
    }
}

impl WrapperConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = get(ENV_SCRATCH_DIR) {
            config.scratch_root = PathBuf::from(dir);
        }

        if let Some(secs) = get(ENV_TIMEOUT_SECS) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                SociError::ConfigError(format!(
                    "{} must be a whole number of seconds, got '{}'",
                    ENV_TIMEOUT_SECS, secs
                ))
            })?;
            if secs == 0 {
                return Err(SociError::ConfigError(format!(
                    "{} must be greater than zero",
                    ENV_TIMEOUT_SECS
                )));
            }
            config.timeout = Some(Duration::from_secs(secs));
        }

        if let Some(format) = get(ENV_LOG_FORMAT) {
            config.log_format = format.parse().map_err(SociError::ConfigError)?;
        }

        config.region_override = get(ENV_AWS_REGION);

        Ok(config)
    }

    /// Region used for credential resolution: the override wins over the request's region.
    pub fn effective_region<'a>(&'a self, requested: &'a str) -> &'a str {
        self.region_override.as_deref().unwrap_or(requested)
    }
}
