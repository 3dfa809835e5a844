//! Daemon configuration.
//!
//! Loaded from YAML files and environment variables, then overridden by
//! command-line flags in the binary.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "pipecast.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "PIPECAST_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "PIPECAST";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "PIPECAST_LOG";
/// Environment variable for the producer pipe directory.
pub const INPUT_DIR_ENV_VAR: &str = "PIPECAST_INPUT_DIR";
/// Environment variable for the consumer pipe directory tree.
pub const OUTPUT_DIR_ENV_VAR: &str = "PIPECAST_OUTPUT_DIR";

/// Default producer pipe directory, relative to the working directory.
pub const DEFAULT_INPUT_DIR: &str = "input";
/// Default consumer pipe directory, relative to the working directory.
pub const DEFAULT_OUTPUT_DIR: &str = "output";
/// Default polling granularity.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
/// Default bounded read size for producer pipes.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// Errors produced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Broadcast daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding one producer pipe per resource.
    pub input_dir: PathBuf,
    /// Directory holding one sub-directory of consumer pipes per resource.
    pub output_dir: PathBuf,
    /// Polling granularity for discovery, reads and reconnects.
    pub poll_interval_ms: u64,
    /// Bounded read size; a shorter read ends a drain.
    pub read_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from(DEFAULT_INPUT_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `pipecast.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the workers cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.read_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "read_chunk_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Config rooted in a scratch directory, with a fast poll interval.
    #[cfg(test)]
    pub(crate) fn for_test(root: &std::path::Path) -> Self {
        Self {
            input_dir: root.join(DEFAULT_INPUT_DIR),
            output_dir: root.join(DEFAULT_OUTPUT_DIR),
            poll_interval_ms: 10,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}
