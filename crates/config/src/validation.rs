//! Configuration validation
//!
//! Validates config consistency:
//! - Required fields are present for enabled tracers
//! - Remote tracer addresses and compression level are usable
//! - The collector listen address parses

use std::net::SocketAddr;

use crate::Config;
use crate::collector::CollectorConfig;
use crate::error::{ConfigError, Result};
use crate::tracers::{FileTracerConfig, RemoteTracerConfig};

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if let Some(ref json) = config.tracers.json {
        validate_file_tracer("json", json)?;
    }
    if let Some(ref protobuf) = config.tracers.protobuf {
        validate_file_tracer("protobuf", protobuf)?;
    }
    if let Some(ref remote) = config.tracers.remote {
        validate_remote_tracer(remote)?;
    }
    validate_collector(&config.collector)
}

fn validate_file_tracer(name: &str, config: &FileTracerConfig) -> Result<()> {
    if config.enabled && config.path.as_os_str().is_empty() {
        return Err(ConfigError::missing_field("tracer", name, "path"));
    }
    Ok(())
}

fn validate_remote_tracer(config: &RemoteTracerConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }
    if config.peer_id.is_empty() {
        return Err(ConfigError::missing_field("tracer", "remote", "peer_id"));
    }
    if config.addrs.is_empty() {
        return Err(ConfigError::missing_field("tracer", "remote", "addrs"));
    }
    if let Some(addr) = config.addrs.iter().find(|a| a.trim().is_empty()) {
        return Err(ConfigError::invalid_value(
            "tracer",
            "remote",
            "addrs",
            format!("empty address '{addr}'"),
        ));
    }
    if config.compression_level > 9 {
        return Err(ConfigError::invalid_value(
            "tracer",
            "remote",
            "compression_level",
            format!("{} is not between 0 and 9", config.compression_level),
        ));
    }
    if config.attempt_timeout.is_zero() {
        return Err(ConfigError::invalid_value(
            "tracer",
            "remote",
            "attempt_timeout",
            "must be greater than zero",
        ));
    }
    Ok(())
}

fn validate_collector(config: &CollectorConfig) -> Result<()> {
    if let Err(e) = config.listen.parse::<SocketAddr>() {
        return Err(ConfigError::invalid_value(
            "collector",
            "collector",
            "listen",
            e.to_string(),
        ));
    }
    if config.max_frame_size == 0 {
        return Err(ConfigError::invalid_value(
            "collector",
            "collector",
            "max_frame_size",
            "must be greater than zero",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_remote_requires_peer_id() {
        let err = Config::from_str("[tracers.remote]\naddrs = [\"127.0.0.1:4001\"]").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField { field: "peer_id", .. }
        ));
    }

    #[test]
    fn test_remote_requires_addrs() {
        let err = Config::from_str("[tracers.remote]\npeer_id = \"QmX\"").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "addrs", .. }));
    }

    #[test]
    fn test_disabled_remote_skips_checks() {
        let config = Config::from_str("[tracers.remote]\nenabled = false").unwrap();
        assert!(config.tracers.enabled().is_empty());
    }

    #[test]
    fn test_compression_level_range() {
        let toml = r#"
[tracers.remote]
peer_id = "QmX"
addrs = ["127.0.0.1:4001"]
compression_level = 12
"#;
        let err = Config::from_str(toml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field: "compression_level", .. }
        ));
    }

    #[test]
    fn test_file_tracer_requires_path() {
        let err = Config::from_str("[tracers.json]\nappend = true").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "path", .. }));
    }

    #[test]
    fn test_collector_listen_must_parse() {
        let err = Config::from_str("[collector]\nlisten = \"not-an-address\"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "listen", .. }));
    }
}
