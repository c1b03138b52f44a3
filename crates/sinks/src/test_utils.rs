//! Shared fixtures for tracer tests

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;

use crate::host::{Host, HostError, PeerId, PeerTarget, TraceStream};
use crate::reader::BatchReader;

/// Event type used throughout the tests
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct TestEvent {
    #[prost(string, tag = "1")]
    pub name: String,

    #[prost(uint64, tag = "2")]
    pub seq: u64,
}

impl TestEvent {
    pub fn new(name: &str, seq: u64) -> Self {
        Self {
            name: name.to_string(),
            seq,
        }
    }
}

/// `count` events named `evt-<seq>`
pub fn events(count: u64) -> Vec<TestEvent> {
    (0..count).map(|seq| TestEvent::new(&format!("evt-{seq}"), seq)).collect()
}

/// Decode every batch in a captured remote stream
pub fn decode_batches(data: &[u8]) -> Vec<Vec<TestEvent>> {
    let mut reader = BatchReader::new(data);
    let mut batches = Vec::new();
    while let Ok(Some(batch)) = reader.next_batch() {
        batches.push(batch);
    }
    batches
}

// =============================================================================
// Scripted host
// =============================================================================

/// How a mock stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Open,
    Closed,
    Reset,
}

/// Everything written to one mock stream
#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub protocol: String,
    pub data: Vec<u8>,
    pub writes: usize,
    pub outcome: StreamOutcome,
}

#[derive(Debug, Default)]
struct Script {
    connect_failures: usize,
    stream_failures: usize,
    write_failures: usize,
    hang_connects: bool,
    connect_calls: usize,
    stream_calls: usize,
}

/// Host whose failures are scripted up front
#[derive(Debug, Default)]
pub struct MockHost {
    script: Mutex<Script>,
    streams: Mutex<Vec<Arc<Mutex<StreamRecord>>>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` connect calls
    pub fn fail_connects(self, n: usize) -> Self {
        self.script.lock().connect_failures = n;
        self
    }

    /// Fail the next `n` new_stream calls
    pub fn fail_streams(self, n: usize) -> Self {
        self.script.lock().stream_failures = n;
        self
    }

    /// Make every write on the next `n` opened streams fail
    pub fn fail_writes(self, n: usize) -> Self {
        self.script.lock().write_failures = n;
        self
    }

    /// Fail the next `n` connect calls on a host already in use
    pub fn fail_next_connects(&self, n: usize) {
        self.script.lock().connect_failures = n;
    }

    /// Never complete a connect call
    pub fn hang_connects(self) -> Self {
        self.script.lock().hang_connects = true;
        self
    }

    pub fn connect_calls(&self) -> usize {
        self.script.lock().connect_calls
    }

    pub fn stream_calls(&self) -> usize {
        self.script.lock().stream_calls
    }

    pub fn streams(&self) -> Vec<StreamRecord> {
        self.streams.lock().iter().map(|s| s.lock().clone()).collect()
    }

    /// Poll until at least `n` streams have been opened
    pub async fn wait_for_streams(&self, n: usize) {
        while self.streams.lock().len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Poll until at least `n` connect calls have been made
    pub async fn wait_for_connects(&self, n: usize) {
        while self.connect_calls() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Host for MockHost {
    type Stream = MockStream;

    async fn connect(&self, _target: &PeerTarget) -> Result<(), HostError> {
        let hang = {
            let mut script = self.script.lock();
            script.connect_calls += 1;
            if script.connect_failures > 0 {
                script.connect_failures -= 1;
                return Err(HostError::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
            script.hang_connects
        };

        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn new_stream(&self, peer: &PeerId, protocol: &str) -> Result<MockStream, HostError> {
        let fail_writes = {
            let mut script = self.script.lock();
            script.stream_calls += 1;
            if script.stream_failures > 0 {
                script.stream_failures -= 1;
                return Err(HostError::NotConnected(peer.clone()));
            }
            if script.write_failures > 0 {
                script.write_failures -= 1;
                true
            } else {
                false
            }
        };

        let record = Arc::new(Mutex::new(StreamRecord {
            protocol: protocol.to_string(),
            data: Vec::new(),
            writes: 0,
            outcome: StreamOutcome::Open,
        }));
        self.streams.lock().push(Arc::clone(&record));
        Ok(MockStream {
            record,
            fail_writes,
        })
    }
}

/// Stream that records writes into a shared [`StreamRecord`]
#[derive(Debug)]
pub struct MockStream {
    record: Arc<Mutex<StreamRecord>>,
    fail_writes: bool,
}

impl MockStream {
    /// A standalone stream and a handle to what it records
    pub fn detached() -> (Self, Arc<Mutex<StreamRecord>>) {
        let record = Arc::new(Mutex::new(StreamRecord {
            protocol: String::new(),
            data: Vec::new(),
            writes: 0,
            outcome: StreamOutcome::Open,
        }));
        let stream = Self {
            record: Arc::clone(&record),
            fail_writes: false,
        };
        (stream, record)
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream broken",
            )));
        }
        let mut record = self.record.lock();
        record.writes += 1;
        record.data.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl TraceStream for MockStream {
    async fn close(self) -> io::Result<()> {
        self.record.lock().outcome = StreamOutcome::Closed;
        Ok(())
    }

    fn reset(self) {
        self.record.lock().outcome = StreamOutcome::Reset;
    }
}
