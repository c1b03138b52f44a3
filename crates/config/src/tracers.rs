//! Tracer configuration
//!
//! Each tracer is optional; only the sections present (and enabled) are
//! started.
//!
//! # Example
//!
//! ```toml
//! [tracers.json]
//! path = "trace.json"
//!
//! [tracers.protobuf]
//! path = "trace.pb"
//! append = true
//!
//! [tracers.remote]
//! peer_id = "QmCollector"
//! addrs = ["10.0.0.7:4001"]
//! batch_window = "1s"
//! retry_interval = "1m"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Tracers to start for the protocol engine
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TracersConfig {
    /// Newline-delimited JSON file
    pub json: Option<FileTracerConfig>,

    /// Length-delimited protobuf file
    pub protobuf: Option<FileTracerConfig>,

    /// Remote collector peer
    pub remote: Option<RemoteTracerConfig>,
}

impl TracersConfig {
    /// Names of the enabled tracers
    pub fn enabled(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.json.as_ref().is_some_and(|c| c.enabled) {
            names.push("json");
        }
        if self.protobuf.as_ref().is_some_and(|c| c.enabled) {
            names.push("protobuf");
        }
        if self.remote.as_ref().is_some_and(|c| c.enabled) {
            names.push("remote");
        }
        names
    }
}

/// File tracer configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileTracerConfig {
    /// Whether this tracer is enabled
    /// Default: true
    pub enabled: bool,

    /// Output file path
    /// Required when enabled
    pub path: PathBuf,

    /// Append to an existing file instead of truncating it
    /// Default: false
    pub append: bool,
}

impl Default for FileTracerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::new(),
            append: false,
        }
    }
}

/// Remote tracer configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteTracerConfig {
    /// Whether this tracer is enabled
    /// Default: true
    pub enabled: bool,

    /// Identity of the collector peer
    /// Required when enabled
    pub peer_id: String,

    /// Addresses the collector can be dialed on (host:port)
    /// Required when enabled
    pub addrs: Vec<String>,

    /// How long to accumulate events after a wake before sending
    /// Default: 1s
    #[serde(with = "humantime_serde")]
    pub batch_window: Duration,

    /// Timeout for each connect or open-stream attempt
    /// Default: 1m
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Duration,

    /// Wait time between failed connect or open-stream attempts
    /// Default: 1m
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,

    /// Gzip compression level (0-9)
    /// Default: 6
    pub compression_level: u32,
}

impl Default for RemoteTracerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            peer_id: String::new(),
            addrs: Vec::new(),
            batch_window: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(60),
            retry_interval: Duration::from_secs(60),
            compression_level: 6,
        }
    }
}
