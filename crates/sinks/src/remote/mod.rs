//! Remote tracer
//!
//! Ships events to a collector peer over a stream obtained from a [`Host`].
//!
//! # Wire format
//!
//! The stream opens with the protocol header (see [`crate::host`]) and then
//! carries a single gzip stream. Each batch is one varint length-delimited
//! `TraceEventBatch` frame, and the compressor is sync-flushed after every
//! frame so the collector can decode it without waiting for more data:
//!
//! ```text
//! gzip( [len][TraceEventBatch] <sync flush> [len][TraceEventBatch] <sync flush> ... <trailer> )
//! ```
//!
//! # Write loop
//!
//! 1. Open a stream through the [`Connector`], retrying until cancelled
//! 2. Wait for a wake, then sleep `batch_window` so events accumulate
//! 3. Swap the buffer and send everything as one batch
//! 4. On failure reset the stream, drop the batch and reconnect
//! 5. On close (or cancellation) send the final batch, finish the gzip stream
//!    and close the stream gracefully, or reset it if the last send failed
//!
//! Delivery is at most once: a batch that fails is never retried. Closing
//! while no stream is open lets the current connect attempt finish but stops
//! retrying; if that attempt fails, whatever is still queued is counted in
//! `events_dropped`.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use prost::Message;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::buffer::{Signal, TraceBuffer, Wakeup};
use crate::common::{EventTracer, MetricsSnapshot, TracerMetrics};
use crate::connect::{ConnectConfig, ConnectError, Connector};
use crate::encoder::{EncodeError, encode_batch};
use crate::handle::TracerHandle;
use crate::host::{Host, PROTOCOL_ID, PeerTarget, TraceStream};

/// Default time to accumulate events after a wake
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_secs(1);

/// Remote tracer settings
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Accumulation window between a wake and the buffer swap
    pub batch_window: Duration,

    /// Retry policy for connecting and opening streams
    pub connect: ConnectConfig,

    /// Gzip compression level
    pub compression: Compression,

    /// Protocol identifier requested when opening a stream
    pub protocol: String,

    /// Tracer name for logs
    pub name: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            batch_window: DEFAULT_BATCH_WINDOW,
            connect: ConnectConfig::default(),
            compression: Compression::default(),
            protocol: PROTOCOL_ID.to_string(),
            name: "remote".to_string(),
        }
    }
}

impl RemoteConfig {
    #[must_use]
    pub fn with_batch_window(mut self, window: Duration) -> Self {
        self.batch_window = window;
        self
    }

    #[must_use]
    pub fn with_connect(mut self, connect: ConnectConfig) -> Self {
        self.connect = connect;
        self
    }

    #[must_use]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl From<&pstrace_config::RemoteTracerConfig> for RemoteConfig {
    fn from(config: &pstrace_config::RemoteTracerConfig) -> Self {
        Self::default()
            .with_batch_window(config.batch_window)
            .with_connect(ConnectConfig::from(config))
            .with_compression(Compression::new(config.compression_level))
    }
}

/// Tracer sending batches of events to a remote collector
pub struct RemoteTracer<E> {
    handle: TracerHandle<E>,
}

impl<E: Message + 'static> RemoteTracer<E> {
    /// Trace to `target` with default settings
    ///
    /// The write loop stops connecting or reconnecting once `cancel` fires.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new<H: Host>(cancel: CancellationToken, host: Arc<H>, target: PeerTarget) -> Self {
        Self::with_config(cancel, host, target, RemoteConfig::default())
    }

    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn with_config<H: Host>(
        cancel: CancellationToken,
        host: Arc<H>,
        target: PeerTarget,
        config: RemoteConfig,
    ) -> Self {
        let (buffer, wakeup) = TraceBuffer::new();
        let buffer = Arc::new(buffer);
        let metrics = Arc::new(TracerMetrics::new());

        let connector = Connector::new(host, target, cancel)
            .with_config(config.connect.clone())
            .with_protocol(config.protocol.clone())
            .with_name(config.name.clone())
            .with_metrics(Arc::clone(&metrics));
        let writer = RemoteWriter::new(
            Arc::clone(&buffer),
            wakeup,
            connector,
            &config,
            Arc::clone(&metrics),
        );

        Self {
            handle: TracerHandle::spawn(config.name, buffer, metrics, writer.run()),
        }
    }

    /// Build a tracer from its TOML configuration
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn from_config<H: Host>(
        cancel: CancellationToken,
        host: Arc<H>,
        config: &pstrace_config::RemoteTracerConfig,
    ) -> Self {
        Self::with_config(cancel, host, PeerTarget::from(config), RemoteConfig::from(config))
    }

    /// Queue an event; never blocks
    pub fn trace(&self, event: E) {
        self.handle.trace(event);
    }

    /// Stop accepting events; the write loop sends what is queued and
    /// closes the stream
    ///
    /// Safe to call more than once.
    pub fn close(&self) {
        self.handle.close();
    }

    /// True once closed, cancelled, or the write loop has given up
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Close and wait for the write loop to finish
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

impl<E: Message + 'static> EventTracer<E> for RemoteTracer<E> {
    fn trace(&self, event: E) {
        self.handle.trace(event);
    }
}

#[derive(Debug, Error)]
enum BatchError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An open stream with the gzip compressor layered over it
///
/// The compressor writes into a buffer that is moved to the stream after
/// every sync flush.
struct Session<S> {
    stream: S,
    gzip: GzEncoder<Vec<u8>>,
}

impl<S: TraceStream> Session<S> {
    fn new(stream: S, compression: Compression) -> Self {
        Self {
            stream,
            gzip: GzEncoder::new(Vec::new(), compression),
        }
    }

    /// Compress `frame`, sync-flush, and write the result to the stream
    ///
    /// Returns the number of compressed bytes written.
    async fn send(&mut self, frame: &[u8]) -> io::Result<u64> {
        self.gzip.write_all(frame)?;
        self.gzip.flush()?;

        let compressed = self.gzip.get_mut();
        let len = compressed.len() as u64;
        let written = self.stream.write_all(compressed).await;
        compressed.clear();
        written?;
        self.stream.flush().await?;
        Ok(len)
    }

    /// Write the gzip trailer and close the stream
    async fn finish(self) -> io::Result<()> {
        let Self { mut stream, gzip } = self;
        let trailer = match gzip.finish() {
            Ok(trailer) => trailer,
            Err(e) => {
                stream.reset();
                return Err(e);
            }
        };

        let written = async {
            stream.write_all(&trailer).await?;
            stream.flush().await
        }
        .await;
        if let Err(e) = written {
            stream.reset();
            return Err(e);
        }

        stream.close().await
    }

    fn reset(self) {
        self.stream.reset();
    }
}

/// Write loop state, owned by the spawned task
struct RemoteWriter<E, H: Host> {
    name: String,
    buffer: Arc<TraceBuffer<E>>,
    wakeup: Wakeup,
    connector: Connector<H>,
    batch_window: Duration,
    compression: Compression,
    metrics: Arc<TracerMetrics>,
    /// Events taken from the buffer by the last swap
    scratch: Vec<E>,
    /// Uncompressed encoding of the current batch
    frame: Vec<u8>,
    /// A wake arrived while a stream was being opened
    pending_wake: bool,
}

impl<E: Message, H: Host> RemoteWriter<E, H> {
    fn new(
        buffer: Arc<TraceBuffer<E>>,
        wakeup: Wakeup,
        connector: Connector<H>,
        config: &RemoteConfig,
        metrics: Arc<TracerMetrics>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            buffer,
            wakeup,
            connector,
            batch_window: config.batch_window,
            compression: config.compression,
            metrics,
            scratch: Vec::new(),
            frame: Vec::new(),
            pending_wake: false,
        }
    }

    async fn run(mut self) {
        tracing::info!(
            sink = %self.name,
            peer = %self.connector.target().id(),
            "remote tracer starting"
        );

        if let Some(mut session) = self.open_session().await {
            loop {
                let signal = if std::mem::take(&mut self.pending_wake) {
                    Signal::Wake
                } else {
                    self.next_signal().await
                };
                if !signal.is_closed() {
                    tokio::time::sleep(self.batch_window).await;
                }

                let sent = self.send_batch(&mut session).await;

                if signal.is_closed() {
                    if sent.is_ok() {
                        if let Err(e) = session.finish().await {
                            tracing::warn!(sink = %self.name, error = %e, "failed to close trace stream");
                        }
                    } else {
                        session.reset();
                    }
                    break;
                }

                if sent.is_err() {
                    session.reset();
                    match self.open_session().await {
                        Some(next) => {
                            self.metrics.record_reconnect();
                            session = next;
                        }
                        None => break,
                    }
                }
            }
        }

        // Nothing will drain the buffer from here on.
        self.buffer.close();
        self.buffer.swap(&mut self.scratch);
        if !self.scratch.is_empty() {
            self.metrics.record_abandoned(self.scratch.len() as u64);
            tracing::warn!(
                sink = %self.name,
                events = self.scratch.len(),
                "dropping events that never reached the collector"
            );
            self.scratch.clear();
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            sink = %self.name,
            events_traced = snapshot.events_traced,
            events_written = snapshot.events_written,
            events_dropped = snapshot.events_dropped,
            batches_sent = snapshot.batches_sent,
            batches_failed = snapshot.batches_failed,
            bytes_written = snapshot.bytes_written,
            reconnects = snapshot.reconnects,
            "remote tracer shutting down"
        );
    }

    /// Wait for a wake; cancellation closes the buffer and counts as close
    async fn next_signal(&mut self) -> Signal {
        tokio::select! {
            signal = self.wakeup.wait() => signal,
            () = self.connector.cancelled() => {
                self.buffer.close();
                Signal::Closed
            }
        }
    }

    /// Open a stream, or `None` if closed or cancelled first
    ///
    /// Wakes seen while connecting are remembered in `pending_wake`. Closing
    /// lets the attempt in flight finish but stops further retries.
    async fn open_session(&mut self) -> Option<Session<H::Stream>> {
        let open = self.connector.open_stream();
        tokio::pin!(open);

        let mut closing = false;
        let result = loop {
            tokio::select! {
                result = &mut open => break result,
                signal = self.wakeup.wait(), if !closing => match signal {
                    Signal::Wake => self.pending_wake = true,
                    Signal::Closed => {
                        closing = true;
                        self.connector.stop_retrying();
                    }
                },
            }
        };

        match result {
            Ok(stream) => Some(Session::new(stream, self.compression)),
            Err(ConnectError::Closed) => {
                tracing::warn!(
                    sink = %self.name,
                    peer = %self.connector.target().id(),
                    "closed before a trace stream could be opened"
                );
                None
            }
            Err(e) => {
                tracing::error!(
                    sink = %self.name,
                    peer = %self.connector.target().id(),
                    error = %e,
                    "giving up on remote trace stream"
                );
                None
            }
        }
    }

    /// Send every queued event as one batch
    ///
    /// Does no I/O when nothing is queued. A failed batch is dropped.
    async fn send_batch(&mut self, session: &mut Session<H::Stream>) -> Result<(), BatchError> {
        self.buffer.swap(&mut self.scratch);
        if self.scratch.is_empty() {
            return Ok(());
        }

        let count = self.scratch.len() as u64;
        self.frame.clear();
        let result = match encode_batch(&self.scratch, &mut self.frame) {
            Ok(()) => session.send(&self.frame).await.map_err(BatchError::from),
            Err(e) => Err(BatchError::from(e)),
        };
        self.scratch.clear();

        match result {
            Ok(bytes) => {
                self.metrics.record_batch_sent(count, bytes);
                tracing::trace!(sink = %self.name, events = count, bytes, "sent trace batch");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_batch_failed();
                match &e {
                    BatchError::Encode(_) => self.metrics.record_encode_error(),
                    BatchError::Io(_) => self.metrics.record_write_error(),
                }
                tracing::error!(
                    sink = %self.name,
                    events = count,
                    error = %e,
                    "failed to send trace batch, dropping it"
                );
                Err(e)
            }
        }
    }
}
