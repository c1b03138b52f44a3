//! Collector metrics

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use pstrace_sinks::TracerMetrics;

/// Connection and batch counters
///
/// Events written to the output file are counted by the output tracer's own
/// metrics, which the snapshot includes.
#[derive(Debug)]
pub struct CollectorMetrics {
    pub connections_opened: AtomicU64,
    pub connections_active: AtomicU64,
    /// Streams that asked for another protocol
    pub streams_rejected: AtomicU64,
    /// Streams that ended in a read or decode error
    pub stream_errors: AtomicU64,
    pub batches_received: AtomicU64,
    pub events_received: AtomicU64,
    output: Arc<TracerMetrics>,
}

impl CollectorMetrics {
    pub(crate) fn new(output: Arc<TracerMetrics>) -> Self {
        Self {
            connections_opened: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            streams_rejected: AtomicU64::new(0),
            stream_errors: AtomicU64::new(0),
            batches_received: AtomicU64::new(0),
            events_received: AtomicU64::new(0),
            output,
        }
    }

    #[inline]
    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn stream_rejected(&self) {
        self.streams_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn stream_error(&self) {
        self.stream_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn batch_received(&self, events: usize) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
        self.events_received.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CollectorSnapshot {
        let output = self.output.snapshot();
        CollectorSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            streams_rejected: self.streams_rejected.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
            batches_received: self.batches_received.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_written: output.events_written,
            write_errors: output.write_errors,
        }
    }
}

/// Point-in-time snapshot of collector metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorSnapshot {
    pub connections_opened: u64,
    pub connections_active: u64,
    pub streams_rejected: u64,
    pub stream_errors: u64,
    pub batches_received: u64,
    pub events_received: u64,
    pub events_written: u64,
    pub write_errors: u64,
}
