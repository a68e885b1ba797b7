//! Application configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `NDS_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use rust_nds::config::NdsConfig;
//!
//! let config = NdsConfig::load_from("config/nds.toml")?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), anyhow::Error>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use nds_core::LogLevel;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/nds.toml";

/// Log levels accepted in `application.log_level`.
pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NdsConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Naming rules settings
    #[serde(default)]
    pub naming: NamingConfig,
    /// Devices created at startup
    #[serde(default)]
    pub devices: Vec<DeviceDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
    /// Level given to device trees (debug, info, warning, error, none)
    #[serde(default = "default_node_log_level")]
    pub node_log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            node_log_level: default_node_log_level(),
        }
    }
}

/// Log output format selected in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// One JSON object per event
    Json,
}

/// Where the naming rules come from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamingConfig {
    /// INI file holding one section per rule set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<PathBuf>,
    /// Section to activate, required together with `rules_file`
    #[serde(default)]
    pub section: String,
}

/// Device created when the application starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefinition {
    /// Driver name (e.g. "testDevice")
    pub driver: String,
    /// Unique device name, also the root node name
    pub name: String,
    /// Driver-specific parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

fn default_name() -> String {
    "rust-nds".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_node_log_level() -> String {
    LogLevel::default().to_string()
}

/// Configuration that loaded but cannot be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `application.log_level` is not a known level
    #[error("invalid log_level '{0}', must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// `application.node_log_level` is not a known level
    #[error("invalid node_log_level '{0}', must be one of: debug, info, warning, error, none")]
    InvalidNodeLogLevel(String),

    /// Two `[[devices]]` entries share a name
    #[error("duplicate device name: {0}")]
    DuplicateDevice(String),

    /// A `[[devices]]` entry without a driver or a name
    #[error("device #{0} needs both a driver and a name")]
    IncompleteDevice(usize),

    /// `naming.rules_file` is set but `naming.section` is empty
    #[error("naming.section must be set when naming.rules_file is")]
    MissingNamingSection,
}

impl NdsConfig {
    /// Loads `path` merged with `NDS_` environment variables.
    ///
    /// A missing file yields the defaults plus whatever the environment sets.
    /// Example: `NDS_APPLICATION__LOG_LEVEL=debug`
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// The provider chain behind [`NdsConfig::load_from`].
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(NdsConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("NDS_").split("__"))
    }

    /// Validates the configuration after loading.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.application.log_level.to_ascii_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.application.log_level.clone()));
        }

        self.node_log_level()?;

        let mut names = HashSet::new();
        for (index, device) in self.devices.iter().enumerate() {
            if device.driver.is_empty() || device.name.is_empty() {
                return Err(ConfigError::IncompleteDevice(index));
            }
            if !names.insert(device.name.as_str()) {
                return Err(ConfigError::DuplicateDevice(device.name.clone()));
            }
        }

        if self.naming.rules_file.is_some() && self.naming.section.is_empty() {
            return Err(ConfigError::MissingNamingSection);
        }

        Ok(())
    }

    /// Parsed `application.node_log_level`.
    pub fn node_log_level(&self) -> Result<LogLevel, ConfigError> {
        LogLevel::parse(&self.application.node_log_level)
            .ok_or_else(|| ConfigError::InvalidNodeLogLevel(self.application.node_log_level.clone()))
    }
}
