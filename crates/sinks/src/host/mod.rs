//! Network host abstraction
//!
//! The remote tracer does not own a transport. It is handed a [`Host`] that
//! can connect to a peer and open a stream to it for a protocol identifier,
//! the same two operations a libp2p host exposes. [`TcpHost`] is a plain TCP
//! implementation for deployments without a peer-to-peer stack.

mod tcp;

use std::fmt;
use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWrite;

pub use tcp::{TcpHost, TcpHostConfig, TcpTraceStream, read_protocol_header, write_protocol_header};

/// Protocol identifier of the remote tracing stream
pub const PROTOCOL_ID: &str = "/libp2p/pubsub/tracer/1.0.0";

/// Identity of a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A peer identity together with the addresses it can be dialed on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTarget {
    id: PeerId,
    addrs: Vec<String>,
}

impl PeerTarget {
    pub fn new(id: impl Into<PeerId>, addrs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id: id.into(),
            addrs: addrs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn addrs(&self) -> &[String] {
        &self.addrs
    }
}

impl From<&pstrace_config::RemoteTracerConfig> for PeerTarget {
    fn from(config: &pstrace_config::RemoteTracerConfig) -> Self {
        Self::new(PeerId::new(config.peer_id.clone()), config.addrs.iter().cloned())
    }
}

/// Errors reported by a [`Host`]
#[derive(Debug, Error)]
pub enum HostError {
    #[error("peer {0} has no addresses")]
    NoAddresses(PeerId),

    #[error("failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("not connected to peer {0}")]
    NotConnected(PeerId),

    #[error("protocol negotiation failed: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A bidirectional stream to a peer, used write-only by the remote tracer
///
/// A stream ends in exactly one of two ways: `close` after a successful
/// session, or `reset` after an error.
#[async_trait]
pub trait TraceStream: AsyncWrite + Unpin + Send + Sized + 'static {
    /// Close both directions, waiting for the peer to acknowledge
    async fn close(self) -> io::Result<()>;

    /// Abort the stream, signalling abnormal termination to the peer
    fn reset(self);
}

/// Connect-to-peer and open-stream capability
#[async_trait]
pub trait Host: Send + Sync + 'static {
    type Stream: TraceStream;

    /// Establish (or confirm) a connection to `target`
    async fn connect(&self, target: &PeerTarget) -> Result<(), HostError>;

    /// Open a new stream to a connected peer for `protocol`
    async fn new_stream(&self, peer: &PeerId, protocol: &str) -> Result<Self::Stream, HostError>;
}
