//! Connection manager for the remote tracer
//!
//! Obtains a stream to the collector peer, retrying forever at a fixed
//! backoff. Every attempt (connect or open-stream) is bounded by
//! `attempt_timeout`, and both attempts and backoff waits end immediately
//! when the parent [`CancellationToken`] is cancelled.
//!
//! ```text
//! ┌─> connect ──fail──> backoff ─┐
//! │      │ ok                    │
//! │      v                       │
//! │  new_stream ──fail──> backoff┘
//! │      │ ok
//! │      v
//! │   stream
//! └── cancelled at any point ──> ConnectError::Cancelled
//! ```
//!
//! [`Connector::stop_retrying`] lets an attempt already in flight finish but
//! turns the next backoff into [`ConnectError::Closed`]. The remote tracer
//! calls it when it is closed before a stream could be opened.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::common::TracerMetrics;
use crate::host::{Host, HostError, PROTOCOL_ID, PeerTarget};

/// Default bound on a single connect or open-stream attempt
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default wait between failed attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Retry policy for [`Connector`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectConfig {
    /// Bound on a single connect or open-stream attempt
    pub attempt_timeout: Duration,

    /// Wait between failed attempts
    pub retry_interval: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl ConnectConfig {
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

impl From<&pstrace_config::RemoteTracerConfig> for ConnectConfig {
    fn from(config: &pstrace_config::RemoteTracerConfig) -> Self {
        Self {
            attempt_timeout: config.attempt_timeout,
            retry_interval: config.retry_interval,
        }
    }
}

/// Why [`Connector::open_stream`] gave up
///
/// Only `Cancelled` and `Closed` are ever returned from `open_stream`; the
/// other variants describe individual failed attempts and show up in retry
/// logs.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("cancelled")]
    Cancelled,

    #[error("closed while connecting")]
    Closed,

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Host(#[from] HostError),
}

impl ConnectError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Opens streams to one peer target on behalf of a write loop
pub struct Connector<H: Host> {
    host: Arc<H>,
    target: PeerTarget,
    cancel: CancellationToken,
    /// Set by `stop_retrying`
    closing: CancellationToken,
    config: ConnectConfig,
    protocol: String,
    /// Tracer name for log records
    name: String,
    metrics: Arc<TracerMetrics>,
}

impl<H: Host> Connector<H> {
    pub fn new(host: Arc<H>, target: PeerTarget, cancel: CancellationToken) -> Self {
        Self {
            host,
            target,
            cancel,
            closing: CancellationToken::new(),
            config: ConnectConfig::default(),
            protocol: PROTOCOL_ID.to_string(),
            name: "remote".to_string(),
            metrics: Arc::new(TracerMetrics::new()),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ConnectConfig) -> Self {
        self.config = config;
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

    /// Count failed attempts in `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<TracerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn target(&self) -> &PeerTarget {
        &self.target
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the parent token is cancelled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Finish the current attempt but do not retry after it
    pub fn stop_retrying(&self) {
        self.closing.cancel();
    }

    /// Connect to the target and open a stream for the tracing protocol
    ///
    /// Retries until it succeeds, the parent token is cancelled, or
    /// [`stop_retrying`](Self::stop_retrying) was called.
    pub async fn open_stream(&self) -> Result<H::Stream, ConnectError> {
        loop {
            self.connect().await?;

            let result = self
                .attempt(self.host.new_stream(self.target.id(), &self.protocol))
                .await;
            match result {
                Ok(stream) => {
                    tracing::debug!(
                        sink = %self.name,
                        peer = %self.target.id(),
                        protocol = %self.protocol,
                        "opened trace stream"
                    );
                    return Ok(stream);
                }
                Err(e) => self.backoff("open trace stream", &e).await?,
            }
        }
    }

    async fn connect(&self) -> Result<(), ConnectError> {
        loop {
            match self.attempt(self.host.connect(&self.target)).await {
                Ok(()) => return Ok(()),
                Err(e) => self.backoff("connect to peer", &e).await?,
            }
        }
    }

    /// Run one host operation under the attempt timeout and the parent token
    async fn attempt<T, F>(&self, operation: F) -> Result<T, ConnectError>
    where
        F: Future<Output = Result<T, HostError>>,
    {
        let attempt_timeout = self.config.attempt_timeout;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ConnectError::Cancelled),
            result = tokio::time::timeout(attempt_timeout, operation) => match result {
                Ok(result) => result.map_err(ConnectError::from),
                Err(_) => Err(ConnectError::Timeout(attempt_timeout)),
            },
        }
    }

    /// Wait out the retry interval after a failed attempt
    async fn backoff(&self, what: &str, error: &ConnectError) -> Result<(), ConnectError> {
        if error.is_cancelled() || self.cancel.is_cancelled() {
            return Err(ConnectError::Cancelled);
        }

        self.metrics.record_connect_failure();
        if self.closing.is_cancelled() {
            tracing::warn!(
                sink = %self.name,
                peer = %self.target.id(),
                error = %error,
                "failed to {what}, not retrying after close"
            );
            return Err(ConnectError::Closed);
        }

        tracing::warn!(
            sink = %self.name,
            peer = %self.target.id(),
            error = %error,
            retry_in_ms = self.config.retry_interval.as_millis() as u64,
            "failed to {what}, will retry"
        );

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ConnectError::Cancelled),
            () = self.closing.cancelled() => Err(ConnectError::Closed),
            () = tokio::time::sleep(self.config.retry_interval) => Ok(()),
        }
    }
}
