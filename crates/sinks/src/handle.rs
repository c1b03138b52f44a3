//! Producer-facing half of a tracer
//!
//! Every tracer is a [`TraceBuffer`] plus one spawned write loop. The handle
//! owns the producer side: it pushes events, counts them, and joins the loop
//! on shutdown. Dropping the handle closes the buffer; the detached loop then
//! drains what is left and terminates on its own.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::buffer::TraceBuffer;
use crate::common::{MetricsSnapshot, TracerError, TracerMetrics};

pub(crate) struct TracerHandle<E> {
    name: String,
    buffer: Arc<TraceBuffer<E>>,
    metrics: Arc<TracerMetrics>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Fail with [`TracerError::NoRuntime`] unless called within a tokio runtime
pub(crate) fn require_runtime() -> Result<(), TracerError> {
    tokio::runtime::Handle::try_current()
        .map(|_| ())
        .map_err(|_| TracerError::NoRuntime)
}

impl<E> TracerHandle<E> {
    /// Spawn `write_loop` on the current runtime
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub(crate) fn spawn<F>(
        name: String,
        buffer: Arc<TraceBuffer<E>>,
        metrics: Arc<TracerMetrics>,
        write_loop: F,
    ) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(write_loop);
        Self {
            name,
            buffer,
            metrics,
            task: Mutex::new(Some(task)),
        }
    }

    pub(crate) fn trace(&self, event: E) {
        if self.buffer.push(event) {
            self.metrics.record_traced();
        } else {
            self.metrics.record_dropped();
            tracing::trace!(sink = %self.name, "dropped event traced after close");
        }
    }

    pub(crate) fn close(&self) {
        if self.buffer.close() {
            tracing::debug!(sink = %self.name, "tracer closed");
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.buffer.is_closed()
    }

    /// Close and wait for the write loop to finish
    pub(crate) async fn shutdown(&self) -> MetricsSnapshot {
        self.close();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::error!(sink = %self.name, error = %e, "tracer write loop panicked");
        }
        self.metrics.snapshot()
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn metrics(&self) -> &Arc<TracerMetrics> {
        &self.metrics
    }
}

impl<E> Drop for TracerHandle<E> {
    fn drop(&mut self) {
        self.buffer.close();
    }
}
