//! The set of tracers configured for a process
//!
//! Builds the tracers enabled in [`TracersConfig`] and fans every event out
//! to all of them.

use std::sync::Arc;

use prost::Message;
use pstrace_config::TracersConfig;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::common::{EventTracer, MetricsSnapshot, TracerError};
use crate::file::{FileTracer, open_options};
use crate::handle::require_runtime;
use crate::host::{Host, TcpHost};
use crate::remote::RemoteTracer;

enum Tracer<E> {
    File(FileTracer<E>),
    Remote(RemoteTracer<E>),
}

impl<E: Message + 'static> Tracer<E> {
    fn trace(&self, event: E) {
        match self {
            Self::File(tracer) => tracer.trace(event),
            Self::Remote(tracer) => tracer.trace(event),
        }
    }

    fn close(&self) {
        match self {
            Self::File(tracer) => tracer.close(),
            Self::Remote(tracer) => tracer.close(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::File(tracer) => tracer.name(),
            Self::Remote(tracer) => tracer.name(),
        }
    }

    async fn shutdown(&self) -> MetricsSnapshot {
        match self {
            Self::File(tracer) => tracer.shutdown().await,
            Self::Remote(tracer) => tracer.shutdown().await,
        }
    }
}

/// All tracers enabled in configuration
pub struct TracerSet<E> {
    tracers: Vec<Tracer<E>>,
}

impl<E> TracerSet<E>
where
    E: Message + Serialize + Clone + 'static,
{
    /// Start the enabled tracers, reaching the remote collector over TCP
    ///
    /// Fails with [`TracerError::NoRuntime`] outside a tokio runtime.
    pub fn from_config(
        config: &TracersConfig,
        cancel: CancellationToken,
    ) -> Result<Self, TracerError> {
        Self::from_config_with_host(config, cancel, Arc::new(TcpHost::new()))
    }

    /// Start the enabled tracers, reaching the remote collector through `host`
    pub fn from_config_with_host<H: Host>(
        config: &TracersConfig,
        cancel: CancellationToken,
        host: Arc<H>,
    ) -> Result<Self, TracerError> {
        require_runtime()?;
        let mut tracers = Vec::new();

        if let Some(json) = config.json.as_ref().filter(|c| c.enabled) {
            let tracer = FileTracer::open_json(&json.path, &open_options(json.append))?;
            tracers.push(Tracer::File(tracer));
        }

        if let Some(protobuf) = config.protobuf.as_ref().filter(|c| c.enabled) {
            let tracer = FileTracer::open_protobuf(&protobuf.path, &open_options(protobuf.append))?;
            tracers.push(Tracer::File(tracer));
        }

        if let Some(remote) = config.remote.as_ref().filter(|c| c.enabled) {
            if remote.addrs.is_empty() {
                return Err(TracerError::config(format!(
                    "remote tracer for peer '{}' has no addresses",
                    remote.peer_id
                )));
            }
            tracers.push(Tracer::Remote(RemoteTracer::from_config(cancel, host, remote)));
        }

        tracing::info!(
            tracers = ?config.enabled(),
            "tracers started"
        );
        Ok(Self { tracers })
    }

    /// Send `event` to every tracer
    ///
    /// Clones once per tracer beyond the first.
    pub fn trace(&self, event: E) {
        if let Some((last, rest)) = self.tracers.split_last() {
            for tracer in rest {
                tracer.trace(event.clone());
            }
            last.trace(event);
        }
    }

    pub fn close(&self) {
        for tracer in &self.tracers {
            tracer.close();
        }
    }

    /// Close every tracer and wait for all of them to finish
    ///
    /// Returns the final metrics of each tracer, by name.
    pub async fn shutdown(&self) -> Vec<(String, MetricsSnapshot)> {
        self.close();
        let mut results = Vec::with_capacity(self.tracers.len());
        for tracer in &self.tracers {
            results.push((tracer.name().to_string(), tracer.shutdown().await));
        }
        results
    }

    pub fn len(&self) -> usize {
        self.tracers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracers.is_empty()
    }
}

impl<E> EventTracer<E> for TracerSet<E>
where
    E: Message + Serialize + Clone + 'static,
{
    fn trace(&self, event: E) {
        TracerSet::trace(self, event);
    }
}

#[cfg(test)]
#[path = "set_test.rs"]
mod set_test;
