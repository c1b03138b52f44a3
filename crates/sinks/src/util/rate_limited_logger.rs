//! Rate-limited error logging
//!
//! A write loop that fails on every event (disk full, closed pipe) would
//! otherwise emit one log line per event. The logger emits at most one
//! `error!` per interval and reports how many were suppressed in between.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default interval between logged errors
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Per-tracer rate-limited error logger
pub struct RateLimitedLogger {
    /// Tracer name attached to every record
    sink: String,

    min_interval: Duration,

    last_log_time: Mutex<Option<Instant>>,

    /// Errors since the last emitted record
    error_count: AtomicU64,

    total_errors: AtomicU64,
}

impl RateLimitedLogger {
    /// Create a logger for `sink` that logs at most once per `min_interval`
    pub fn new(sink: impl Into<String>, min_interval: Duration) -> Self {
        Self {
            sink: sink.into(),
            min_interval,
            last_log_time: Mutex::new(None),
            error_count: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
        }
    }

    /// Create a logger with the default interval
    pub fn with_default_interval(sink: impl Into<String>) -> Self {
        Self::new(sink, DEFAULT_LOG_INTERVAL)
    }

    /// Record an error, logging it if the interval has elapsed
    ///
    /// Returns true if the error was logged, false if it was suppressed.
    pub fn error(&self, message: &str, error: &dyn Display) -> bool {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        let total = self.total_errors.fetch_add(1, Ordering::Relaxed) + 1;

        if !self.interval_elapsed() {
            return false;
        }

        let suppressed = self.error_count.swap(0, Ordering::Relaxed).saturating_sub(1);
        if suppressed > 0 {
            tracing::error!(
                sink = %self.sink,
                error = %error,
                suppressed_count = suppressed,
                total_errors = total,
                "{message} (rate-limited)"
            );
        } else {
            tracing::error!(
                sink = %self.sink,
                error = %error,
                total_errors = total,
                "{message}"
            );
        }
        true
    }

    fn interval_elapsed(&self) -> bool {
        let mut last = self.last_log_time.lock();
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < self.min_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Errors recorded since the last emitted record
    pub fn pending_error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Errors recorded over the logger's lifetime
    pub fn total_error_count(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }
}
