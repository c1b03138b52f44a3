//! TCP implementation of [`Host`]
//!
//! `connect` dials the first reachable address of the target and parks the
//! connection; `new_stream` takes it and negotiates the protocol by sending
//! a multistream-style header:
//!
//! ```text
//! [varint: len(protocol) + 1][protocol bytes]['\n']
//! ```
//!
//! Each stream owns its own TCP connection, so a reset never affects another
//! stream.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{Host, HostError, PeerId, PeerTarget, TraceStream};

/// Longest protocol header accepted by [`read_protocol_header`]
const MAX_PROTOCOL_HEADER_LEN: usize = 1024;

/// Socket options for [`TcpHost`]
#[derive(Debug, Clone)]
pub struct TcpHostConfig {
    /// Disable Nagle's algorithm
    pub nodelay: bool,

    /// TCP keep-alive time, `None` to leave keep-alive off
    pub keepalive: Option<Duration>,

    /// How long a graceful close waits for the peer to close its side
    pub close_timeout: Duration,
}

impl Default for TcpHostConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: Some(Duration::from_secs(30)),
            close_timeout: Duration::from_secs(5),
        }
    }
}

impl TcpHostConfig {
    #[must_use]
    pub fn with_nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }

    #[must_use]
    pub fn with_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.keepalive = keepalive;
        self
    }

    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

/// Host that reaches peers over plain TCP
#[derive(Debug, Default)]
pub struct TcpHost {
    config: TcpHostConfig,

    /// Dialed connections waiting for `new_stream`
    pending: Mutex<HashMap<PeerId, TcpStream>>,
}

impl TcpHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TcpHostConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn configure(&self, stream: &TcpStream) {
        if self.config.nodelay
            && let Err(e) = stream.set_nodelay(true)
        {
            tracing::debug!(error = %e, "failed to set TCP_NODELAY");
        }

        if let Some(time) = self.config.keepalive {
            let keepalive = TcpKeepalive::new().with_time(time);
            #[cfg(target_os = "linux")]
            let keepalive = keepalive.with_interval(time);

            if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
                tracing::debug!(error = %e, "failed to set TCP keep-alive");
            }
        }
    }
}

#[async_trait]
impl Host for TcpHost {
    type Stream = TcpTraceStream;

    async fn connect(&self, target: &PeerTarget) -> Result<(), HostError> {
        if self.pending.lock().contains_key(target.id()) {
            return Ok(());
        }

        let mut last_error = None;
        for addr in target.addrs() {
            match TcpStream::connect(addr.as_str()).await {
                Ok(stream) => {
                    self.configure(&stream);
                    tracing::debug!(peer = %target.id(), addr = %addr, "connected to peer");
                    self.pending.lock().insert(target.id().clone(), stream);
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(peer = %target.id(), addr = %addr, error = %e, "dial failed");
                    last_error = Some(HostError::Dial {
                        addr: addr.clone(),
                        source: e,
                    });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| HostError::NoAddresses(target.id().clone())))
    }

    async fn new_stream(&self, peer: &PeerId, protocol: &str) -> Result<TcpTraceStream, HostError> {
        let pending = self.pending.lock().remove(peer);
        let Some(mut stream) = pending else {
            return Err(HostError::NotConnected(peer.clone()));
        };

        write_protocol_header(&mut stream, protocol).await?;
        Ok(TcpTraceStream {
            stream,
            close_timeout: self.config.close_timeout,
        })
    }
}

/// A protocol-negotiated TCP connection
#[derive(Debug)]
pub struct TcpTraceStream {
    stream: TcpStream,
    close_timeout: Duration,
}

impl AsyncWrite for TcpTraceStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

#[async_trait]
impl TraceStream for TcpTraceStream {
    async fn close(mut self) -> io::Result<()> {
        let close_timeout = self.close_timeout;
        self.stream.shutdown().await?;

        // The peer closes its side once it has consumed everything we sent.
        let mut scratch = [0u8; 256];
        let drained = timeout(close_timeout, async {
            while self.stream.read(&mut scratch).await? > 0 {}
            Ok::<_, io::Error>(())
        })
        .await;

        match drained {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(
                    timeout_ms = close_timeout.as_millis() as u64,
                    "peer did not close stream in time"
                );
                Ok(())
            }
        }
    }

    fn reset(self) {
        // SO_LINGER 0 turns the close into an RST.
        if let Err(e) = SockRef::from(&self.stream).set_linger(Some(Duration::ZERO)) {
            tracing::debug!(error = %e, "failed to set SO_LINGER for reset");
        }
        drop(self.stream);
    }
}

/// Send the protocol header that opens a stream
pub async fn write_protocol_header<W>(writer: &mut W, protocol: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut header = Vec::with_capacity(protocol.len() + 3);
    prost::encoding::encode_varint(protocol.len() as u64 + 1, &mut header);
    header.extend_from_slice(protocol.as_bytes());
    header.push(b'\n');

    writer.write_all(&header).await?;
    writer.flush().await
}

/// Read the protocol header sent by [`write_protocol_header`]
pub async fn read_protocol_header<R>(reader: &mut R) -> Result<String, HostError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8().await?;
        len |= usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 14 {
            return Err(HostError::Protocol("header length prefix too long".into()));
        }
    }

    if len == 0 || len > MAX_PROTOCOL_HEADER_LEN {
        return Err(HostError::Protocol(format!("invalid header length {len}")));
    }

    let mut header = vec![0u8; len];
    reader.read_exact(&mut header).await?;
    if header.pop() != Some(b'\n') {
        return Err(HostError::Protocol("header is not newline-terminated".into()));
    }

    String::from_utf8(header).map_err(|_| HostError::Protocol("header is not UTF-8".into()))
}

#[cfg(test)]
#[path = "tcp_test.rs"]
mod tcp_test;
