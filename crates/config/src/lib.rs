//! pstrace Configuration
//!
//! TOML-based configuration for trace sinks and the trace collector.
//! Every section is optional and falls back to defaults.
//!
//! # Parsing
//!
//! ```
//! use pstrace_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[tracers.json]\npath = \"trace.json\"").unwrap();
//! assert_eq!(config.tracers.enabled(), vec!["json"]);
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [log]
//! level = "info"
//!
//! [tracers.protobuf]
//! path = "trace.pb"
//!
//! [tracers.remote]
//! peer_id = "QmCollector"
//! addrs = ["10.0.0.7:4001"]
//!
//! [collector]
//! listen = "0.0.0.0:4001"
//! output = "traces.pb"
//! ```

mod collector;
mod error;
mod logging;
mod tracers;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use collector::{CollectorConfig, DEFAULT_LISTEN, DEFAULT_MAX_FRAME_SIZE};
pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use tracers::{FileTracerConfig, RemoteTracerConfig, TracersConfig};

use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging for binaries
    pub log: LogConfig,

    /// Tracers attached to the protocol engine
    pub tracers: TracersConfig,

    /// Trace collector server
    pub collector: CollectorConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, contains invalid TOML or
    /// fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        validation::validate_config(&config)?;
        Ok(config)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
