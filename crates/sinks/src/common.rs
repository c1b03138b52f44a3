//! Common types shared by all tracers
//!
//! The `EventTracer` trait producers call into, the metrics every tracer
//! keeps, and construction errors.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

/// A destination for trace events
///
/// `trace` never blocks and never fails from the caller's point of view:
/// the event is queued and delivered by the tracer's own write loop.
pub trait EventTracer<E>: Send + Sync {
    /// Queue an event for delivery
    fn trace(&self, event: E);
}

/// Counters kept by every tracer
///
/// Shared between the producer side (`trace`) and the write loop, so all
/// updates are relaxed atomics.
#[derive(Debug, Default)]
pub struct TracerMetrics {
    /// Events accepted by `trace`
    pub events_traced: AtomicU64,

    /// Events rejected after close, or still queued when a remote tracer
    /// gave up on its collector
    pub events_dropped: AtomicU64,

    /// Events encoded and handed to the underlying stream
    pub events_written: AtomicU64,

    /// Bytes handed to the underlying stream (after compression, if any)
    pub bytes_written: AtomicU64,

    /// Events that could not be serialized
    pub encode_errors: AtomicU64,

    /// Failed writes or flushes on the underlying stream
    pub write_errors: AtomicU64,

    /// Remote batches flushed to a stream
    pub batches_sent: AtomicU64,

    /// Remote batches lost to a serialization or stream failure
    pub batches_failed: AtomicU64,

    /// Streams re-opened after a failure
    pub reconnects: AtomicU64,

    /// Failed connect or open-stream attempts
    pub connect_failures: AtomicU64,
}

impl TracerMetrics {
    /// Create new metrics instance
    pub const fn new() -> Self {
        Self {
            events_traced: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            events_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            encode_errors: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_traced(&self) {
        self.events_traced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record queued events that will never be delivered
    #[inline]
    pub fn record_abandoned(&self, events: u64) {
        self.events_dropped.fetch_add(events, Ordering::Relaxed);
    }

    /// Record events written along with the bytes they took
    #[inline]
    pub fn record_written(&self, events: u64, bytes: u64) {
        self.events_written.fetch_add(events, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_encode_error(&self) {
        self.encode_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a remote batch flushed to the stream
    #[inline]
    pub fn record_batch_sent(&self, events: u64, bytes: u64) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.record_written(events, bytes);
    }

    #[inline]
    pub fn record_batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_traced: self.events_traced.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_written: self.events_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of tracer metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_traced: u64,
    pub events_dropped: u64,
    pub events_written: u64,
    pub bytes_written: u64,
    pub encode_errors: u64,
    pub write_errors: u64,
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub reconnects: u64,
    pub connect_failures: u64,
}

/// Errors from constructing a tracer
///
/// Once a tracer is running, failures stay inside its write loop and are
/// only logged.
#[derive(Debug, Error)]
pub enum TracerError {
    /// Output file could not be opened
    #[error("failed to open trace file '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration cannot be turned into a tracer
    #[error("invalid tracer configuration: {0}")]
    Config(String),

    /// Constructor called outside a tokio runtime
    #[error("tracers must be started within a tokio runtime")]
    NoRuntime,
}

impl TracerError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
#[path = "common_test.rs"]
mod common_test;
