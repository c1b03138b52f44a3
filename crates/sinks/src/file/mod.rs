//! File tracer
//!
//! Writes events to a local file (or any `AsyncWrite`) through an
//! [`EventEncoder`]. Two formats are provided out of the box:
//!
//! - JSON lines via [`FileTracer::create_json`]
//! - varint length-delimited protobuf via [`FileTracer::create_protobuf`]
//!
//! # Write loop
//!
//! ```text
//! wait ──Wake──> swap ──> encode + write each event ──> flush ──┐
//!  ^                                                            │
//!  └────────────────────────────────────────────────────────────┘
//! wait ──Closed──> swap ──> encode + write ──> shutdown writer ──> done
//! ```
//!
//! A failed encode or write is counted and logged (rate limited) and the loop
//! moves on to the next event.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use prost::Message;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::buffer::{TraceBuffer, Wakeup};
use crate::common::{EventTracer, MetricsSnapshot, TracerError, TracerMetrics};
use crate::encoder::{Delimited, EventEncoder, JsonLines};
use crate::handle::{TracerHandle, require_runtime};
use crate::util::RateLimitedLogger;

/// Permissions for newly created trace files
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// Options used by the `create_*` constructors
///
/// Write-only and created if missing. With `append` false the file is
/// truncated, otherwise new records are appended to it.
pub fn open_options(append: bool) -> OpenOptions {
    let mut options = OpenOptions::new();
    options.create(true).write(true);
    if append {
        options.append(true);
    } else {
        options.truncate(true);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(FILE_MODE);
    }

    options
}

/// Tracer writing encoded events to a byte stream
pub struct FileTracer<E> {
    handle: TracerHandle<E>,
}

impl<E: Send + 'static> FileTracer<E> {
    /// Trace into an arbitrary writer
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn from_writer<W, C>(writer: W, encoder: C) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        C: EventEncoder<E>,
    {
        Self::from_writer_with_name("file", writer, encoder)
    }

    /// Trace into an arbitrary writer, naming the tracer in logs
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn from_writer_with_name<W, C>(name: impl Into<String>, writer: W, encoder: C) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        C: EventEncoder<E>,
    {
        let name = name.into();
        let (buffer, wakeup) = TraceBuffer::new();
        let buffer = Arc::new(buffer);
        let metrics = Arc::new(TracerMetrics::new());

        let writer = FileWriter {
            name: name.clone(),
            buffer: Arc::clone(&buffer),
            wakeup,
            writer: BufWriter::new(writer),
            encoder,
            metrics: Arc::clone(&metrics),
            errors: RateLimitedLogger::with_default_interval(name.clone()),
            scratch: Vec::new(),
            encoded: Vec::new(),
        };

        Self {
            handle: TracerHandle::spawn(name, buffer, metrics, writer.run()),
        }
    }

    /// Open `path` with `options` and trace into it
    ///
    /// Fails with [`TracerError::NoRuntime`] outside a tokio runtime, before
    /// the file is touched.
    pub fn open<C>(path: impl AsRef<Path>, options: &OpenOptions, encoder: C) -> Result<Self, TracerError>
    where
        C: EventEncoder<E>,
    {
        require_runtime()?;
        let path = path.as_ref();
        let file = options.open(path).map_err(|source| TracerError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(path = %path.display(), "opened trace file");
        let file = tokio::fs::File::from_std(file);
        Ok(Self::from_writer_with_name(path.display().to_string(), file, encoder))
    }

    /// Queue an event; never blocks
    pub fn trace(&self, event: E) {
        self.handle.trace(event);
    }

    /// Stop accepting events; the write loop drains and closes the file
    ///
    /// Safe to call more than once.
    pub fn close(&self) {
        self.handle.close();
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Close and wait until every queued event has been written
    pub async fn shutdown(&self) -> MetricsSnapshot {
        self.handle.shutdown().await
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn metrics(&self) -> &Arc<TracerMetrics> {
        self.handle.metrics()
    }
}

impl<E: Serialize + Send + 'static> FileTracer<E> {
    /// Create or truncate `path` and write one JSON object per line
    pub fn create_json(path: impl AsRef<Path>) -> Result<Self, TracerError> {
        Self::open_json(path, &open_options(false))
    }

    pub fn open_json(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self, TracerError> {
        Self::open(path, options, JsonLines)
    }
}

impl<E: Message + Send + 'static> FileTracer<E> {
    /// Create or truncate `path` and write length-delimited protobuf records
    pub fn create_protobuf(path: impl AsRef<Path>) -> Result<Self, TracerError> {
        Self::open_protobuf(path, &open_options(false))
    }

    pub fn open_protobuf(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self, TracerError> {
        Self::open(path, options, Delimited)
    }
}

impl<E: Send + 'static> EventTracer<E> for FileTracer<E> {
    fn trace(&self, event: E) {
        self.handle.trace(event);
    }
}

/// Write loop state, owned by the spawned task
struct FileWriter<E, W, C> {
    name: String,
    buffer: Arc<TraceBuffer<E>>,
    wakeup: Wakeup,
    writer: BufWriter<W>,
    encoder: C,
    metrics: Arc<TracerMetrics>,
    errors: RateLimitedLogger,
    /// Events taken from the buffer by the last swap
    scratch: Vec<E>,
    /// Encoding of the current event
    encoded: Vec<u8>,
}

impl<E, W, C> FileWriter<E, W, C>
where
    E: Send + 'static,
    W: AsyncWrite + Unpin + Send,
    C: EventEncoder<E>,
{
    async fn run(mut self) {
        tracing::info!(sink = %self.name, "file tracer starting");

        loop {
            let signal = self.wakeup.wait().await;
            self.drain().await;
            if signal.is_closed() {
                break;
            }
        }

        if let Err(e) = self.writer.shutdown().await {
            self.metrics.record_write_error();
            tracing::error!(sink = %self.name, error = %e, "failed to close trace output");
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            sink = %self.name,
            events_traced = snapshot.events_traced,
            events_written = snapshot.events_written,
            bytes_written = snapshot.bytes_written,
            encode_errors = snapshot.encode_errors,
            write_errors = snapshot.write_errors,
            "file tracer shutting down"
        );
    }

    /// Write every event queued since the last drain
    async fn drain(&mut self) {
        self.buffer.swap(&mut self.scratch);
        if self.scratch.is_empty() {
            return;
        }

        for event in self.scratch.drain(..) {
            self.encoded.clear();
            if let Err(e) = self.encoder.encode(&event, &mut self.encoded) {
                self.metrics.record_encode_error();
                self.errors.error("failed to encode trace event", &e);
                continue;
            }

            match self.writer.write_all(&self.encoded).await {
                Ok(()) => self.metrics.record_written(1, self.encoded.len() as u64),
                Err(e) => {
                    self.metrics.record_write_error();
                    self.errors.error("failed to write trace event", &e);
                }
            }
        }

        if let Err(e) = self.writer.flush().await {
            self.metrics.record_write_error();
            self.errors.error("failed to flush trace output", &e);
        }
    }
}
