//! Collector errors

use std::io;

use pstrace_sinks::{DecodeError, HostError, TracerError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Output(#[from] TracerError),

    #[error("unsupported protocol '{0}'")]
    UnsupportedProtocol(String),

    #[error(transparent)]
    Handshake(#[from] HostError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
