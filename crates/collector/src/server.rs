//! TCP server accepting remote tracer streams
//!
//! Each accepted connection runs in its own task:
//!
//! 1. Read the protocol header and reject anything but the tracer protocol
//! 2. Feed socket reads into a [`BatchDecoder`]
//! 3. Trace every event of every completed batch into the output file,
//!    still encoded, so the file holds the events exactly as sent
//!
//! The output is a single length-delimited file shared by all connections.
//! Events from one connection keep their order; events from different
//! connections interleave by batch.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use pstrace_config::CollectorConfig;
use pstrace_sinks::{BatchDecoder, FileTracer, PROTOCOL_ID, RawDelimited, open_options, read_protocol_header};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::CollectorError;
use crate::metrics::{CollectorMetrics, CollectorSnapshot};

/// Socket read size
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Trace collector bound to its listen address
pub struct Collector {
    config: CollectorConfig,
    listener: TcpListener,
    output: Arc<FileTracer<Bytes>>,
    metrics: Arc<CollectorMetrics>,
}

impl Collector {
    /// Bind the listen address and open the output file
    pub async fn bind(config: CollectorConfig) -> Result<Self, CollectorError> {
        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|source| CollectorError::Bind {
                address: config.listen.clone(),
                source,
            })?;

        let output = FileTracer::open(&config.output, &open_options(config.append), RawDelimited)?;
        let metrics = Arc::new(CollectorMetrics::new(Arc::clone(output.metrics())));

        tracing::info!(
            address = %config.listen,
            output = %config.output.display(),
            append = config.append,
            "trace collector listening"
        );

        Ok(Self {
            config,
            listener,
            output: Arc::new(output),
            metrics,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn metrics(&self) -> &Arc<CollectorMetrics> {
        &self.metrics
    }

    /// Accept tracer streams until `cancel` fires
    ///
    /// On cancellation, open connections stop reading, the output file is
    /// flushed and closed, and the final metrics are returned.
    pub async fn run(self, cancel: CancellationToken) -> CollectorSnapshot {
        let Self {
            config,
            listener,
            output,
            metrics,
        } = self;
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,

                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        metrics.connection_opened();
                        let connection = Connection {
                            peer,
                            output: Arc::clone(&output),
                            metrics: Arc::clone(&metrics),
                            max_frame_size: config.max_frame_size,
                        };
                        connections.spawn(connection.run(stream, cancel.clone()));
                    }
                    Err(e) => {
                        // Transient accept errors - log and continue
                        tracing::warn!(error = %e, "accept error");
                    }
                },

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "connection task failed");
                    }
                }
            }
        }
        drop(listener);

        let drained = tokio::time::timeout(config.shutdown_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                timeout_ms = config.shutdown_timeout.as_millis() as u64,
                "connections did not finish in time, aborting"
            );
            connections.shutdown().await;
        }

        output.shutdown().await;

        let snapshot = metrics.snapshot();
        tracing::info!(
            connections = snapshot.connections_opened,
            batches_received = snapshot.batches_received,
            events_received = snapshot.events_received,
            events_written = snapshot.events_written,
            stream_errors = snapshot.stream_errors,
            "trace collector stopped"
        );
        snapshot
    }
}

/// One tracer connection
struct Connection {
    peer: SocketAddr,
    output: Arc<FileTracer<Bytes>>,
    metrics: Arc<CollectorMetrics>,
    max_frame_size: usize,
}

impl Connection {
    async fn run(self, mut stream: TcpStream, cancel: CancellationToken) {
        match self.serve(&mut stream, &cancel).await {
            Ok(()) => tracing::debug!(peer = %self.peer, "tracer stream ended"),
            Err(e) => {
                if !matches!(e, CollectorError::UnsupportedProtocol(_)) {
                    self.metrics.stream_error();
                }
                tracing::warn!(peer = %self.peer, error = %e, "tracer stream failed");
            }
        }
        self.metrics.connection_closed();
    }

    async fn serve(&self, stream: &mut TcpStream, cancel: &CancellationToken) -> Result<(), CollectorError> {
        let protocol = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            header = read_protocol_header(stream) => header?,
        };
        if protocol != PROTOCOL_ID {
            self.metrics.stream_rejected();
            return Err(CollectorError::UnsupportedProtocol(protocol));
        }
        tracing::debug!(peer = %self.peer, "accepted tracer stream");

        let mut decoder = BatchDecoder::new().with_max_frame_size(self.max_frame_size);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let n = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                read = stream.read(&mut buf) => read?,
            };
            if n == 0 {
                decoder.finish()?;
                return Ok(());
            }

            decoder.feed(&buf[..n])?;
            while let Some(batch) = decoder.next_raw_batch()? {
                self.metrics.batch_received(batch.batch.len());
                tracing::trace!(peer = %self.peer, events = batch.batch.len(), "received trace batch");
                for event in batch.batch {
                    self.output.trace(event);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "server_test.rs"]
mod server_test;
