use ::config as cfg;
use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Smallest ring capacity that leaves one usable slot next to the reserved one.
pub const MIN_RING_CAPACITY: usize = 2;

const ENV_PREFIX: &str = "CONVEYOR";

/// Settings for every queue built by an application, plus its logging setup.
///
/// Sources are layered in this order, later ones winning:
/// 1. `default.toml` in the configuration directory
/// 2. `local.toml` in the configuration directory
/// 3. Environment variables (`CONVEYOR__*`, e.g. `CONVEYOR__RING__CAPACITY=64`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default)]
    pub blocking: BlockingQueueConfig,

    #[serde(default)]
    pub ring: RingQueueConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingQueueConfig {
    /// Upper bound on queued elements; 0 means unbounded.
    #[serde(default)]
    pub capacity: u32,
}

impl Default for BlockingQueueConfig {
    fn default() -> Self {
        Self { capacity: 0 }
    }
}

impl BlockingQueueConfig {
    pub fn bounded(capacity: u32) -> Self {
        Self { capacity }
    }

    pub fn is_bounded(&self) -> bool {
        self.capacity != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingQueueConfig {
    /// Total slot count. One slot stays empty, so `capacity - 1` are usable.
    #[serde(default = "RingQueueConfig::default_capacity")]
    pub capacity: usize,
}

impl Default for RingQueueConfig {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
        }
    }
}

impl RingQueueConfig {
    fn default_capacity() -> usize {
        1024
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "compact", "full"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

pub(crate) const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "full"];

impl QueueSettings {
    /// Parse a single TOML document. Missing sections fall back to defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let settings: Self = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load layered settings from `config_dir` and the environment.
    pub fn load(config_dir: &Path) -> Result<Self> {
        Self::load_with_prefix(config_dir, ENV_PREFIX)
    }

    /// Like [`load`](Self::load), reading `<env_prefix>__*` variables.
    pub fn load_with_prefix(config_dir: &Path, env_prefix: &str) -> Result<Self> {
        let settings: Self = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                cfg::Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        debug!(
            "Loaded queue settings from {:?}: blocking={:?} ring={:?}",
            config_dir, settings.blocking, settings.ring
        );
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ring.capacity < MIN_RING_CAPACITY {
            return Err(ConfigError::Validation(format!(
                "ring.capacity must be at least {}, got {}",
                MIN_RING_CAPACITY, self.ring.capacity
            )));
        }
        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.format must be one of {:?}, got {:?}",
                LOG_FORMATS, self.logging.format
            )));
        }
        Ok(())
    }
}
