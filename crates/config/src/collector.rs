//! Collector configuration
//!
//! ```toml
//! [collector]
//! listen = "0.0.0.0:4001"
//! output = "traces.pb"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Default listen address for the collector
pub const DEFAULT_LISTEN: &str = "0.0.0.0:4001";

/// Largest decompressed batch frame accepted by default (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Trace collector configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Address to accept tracer connections on
    /// Default: 0.0.0.0:4001
    pub listen: String,

    /// File the received events are written to (length-delimited records)
    /// Default: traces.pb
    pub output: PathBuf,

    /// Append to an existing output file instead of truncating it
    /// Default: false
    pub append: bool,

    /// Largest decompressed batch frame accepted from a tracer
    /// Default: 16MiB
    pub max_frame_size: usize,

    /// Time allowed for open connections to finish on shutdown
    /// Default: 5s
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            output: PathBuf::from("traces.pb"),
            append: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}
