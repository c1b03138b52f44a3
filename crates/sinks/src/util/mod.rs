//! Shared utilities for tracer write loops

pub mod rate_limited_logger;

pub use rate_limited_logger::{DEFAULT_LOG_INTERVAL, RateLimitedLogger};
