//! pstrace - Sinks
//!
//! Non-blocking tracers for pub/sub protocol events.
//!
//! # Architecture
//!
//! Producers call `trace`, which appends to a mutex-guarded buffer and pokes
//! a single-slot wake channel. Each tracer runs one write loop task that
//! swaps the buffer out and does all encoding and I/O outside the lock.
//!
//! ```text
//! [protocol engine] --trace(E)--> [TraceBuffer] --swap--> [write loop] --> [file | stream]
//! ```
//!
//! # Available Tracers
//!
//! | Tracer | Output | Event bound |
//! |--------|--------|-------------|
//! | `FileTracer` (JSON) | one JSON object per line | `Serialize` |
//! | `FileTracer` (protobuf) | length-delimited records | `prost::Message` |
//! | `RemoteTracer` | gzip stream of batches to a collector peer | `prost::Message` |
//!
//! # Example
//!
//! ```ignore
//! use pstrace_sinks::{FileTracer, RemoteTracer, PeerTarget, TcpHost};
//!
//! let json = FileTracer::create_json("trace.json")?;
//! let remote = RemoteTracer::new(cancel, Arc::new(TcpHost::new()),
//!     PeerTarget::new("QmCollector", ["10.0.0.7:4001"]));
//!
//! json.trace(event.clone());
//! remote.trace(event);
//!
//! json.shutdown().await;
//! remote.shutdown().await;
//! ```

// =============================================================================
// Tracers
// =============================================================================

/// File tracer - JSON lines or delimited protobuf
pub mod file;

/// Remote tracer - batched, gzip-compressed delivery to a collector
pub mod remote;

/// Every tracer enabled in configuration
pub mod set;

// =============================================================================
// Building blocks
// =============================================================================

/// Event buffer with coalesced wake signal
pub mod buffer;

/// Per-event and batch serialization
pub mod encoder;

/// Host capability and the TCP host
pub mod host;

/// Connect and open-stream retry loop
pub mod connect;

/// Readers for trace files and remote streams
pub mod reader;

/// Shared utilities for write loops
pub mod util;

mod common;
mod handle;

#[cfg(test)]
mod test_utils;

// =============================================================================
// Public re-exports
// =============================================================================

pub use common::{EventTracer, MetricsSnapshot, TracerError, TracerMetrics};

pub use buffer::{Signal, TraceBuffer, Wakeup};
pub use connect::{ConnectConfig, ConnectError, Connector};
pub use encoder::{Delimited, EncodeError, EventEncoder, JsonLines, RawDelimited, encode_batch};
pub use file::{FileTracer, open_options};
pub use host::{
    Host, HostError, PROTOCOL_ID, PeerId, PeerTarget, TcpHost, TcpHostConfig, TcpTraceStream,
    TraceStream, read_protocol_header, write_protocol_header,
};
pub use reader::{BatchDecoder, BatchReader, DecodeError, DelimitedReader, RawBatch, read_delimited};
pub use remote::{RemoteConfig, RemoteTracer};
pub use set::TracerSet;
