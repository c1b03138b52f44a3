//! Readers for trace files and remote trace streams
//!
//! Both formats are sequences of varint length-delimited frames. A file frame
//! is one event; a remote frame is one `TraceEventBatch`, and the whole
//! remote stream is gzip-compressed with a sync flush after every frame.
//!
//! - [`BatchReader`] pulls batches from a blocking `Read`
//! - [`BatchDecoder`] is fed bytes as they arrive, for async receivers

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzDecoder as GzWriteDecoder;
use prost::Message;
use thiserror::Error;

/// Default upper bound on a single frame (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Longest valid varint for a 64-bit length
const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("malformed length prefix")]
    InvalidLength,

    #[error("stream ended inside a frame")]
    Truncated,

    #[error("protobuf decoding failed: {0}")]
    Protobuf(#[from] prost::DecodeError),
}

/// A decoded `TraceEventBatch` whose events are left encoded
#[derive(Clone, PartialEq, Message)]
pub struct RawBatch {
    #[prost(bytes = "bytes", repeated, tag = "1")]
    pub batch: Vec<Bytes>,
}

impl RawBatch {
    /// Decode every event in the batch
    pub fn decode_events<E: Message + Default>(&self) -> Result<Vec<E>, DecodeError> {
        self.batch
            .iter()
            .map(|raw| E::decode(raw.as_ref()).map_err(DecodeError::from))
            .collect()
    }
}

/// Reads varint length-delimited frames from a byte stream
pub struct DelimitedReader<R> {
    reader: R,
    frame: Vec<u8>,
    max_frame_size: usize,
}

impl<R: Read> DelimitedReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            frame: Vec::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Reject frames larger than `max` bytes
    #[must_use]
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Read the next frame
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames.
    pub fn next_frame(&mut self) -> Result<Option<&[u8]>, DecodeError> {
        let Some(len) = self.read_length()? else {
            return Ok(None);
        };
        if len > self.max_frame_size {
            return Err(DecodeError::FrameTooLarge {
                len,
                max: self.max_frame_size,
            });
        }

        self.frame.resize(len, 0);
        self.reader.read_exact(&mut self.frame).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                DecodeError::Truncated
            } else {
                DecodeError::Io(e)
            }
        })?;
        Ok(Some(&self.frame))
    }

    fn read_length(&mut self) -> Result<Option<usize>, DecodeError> {
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let mut byte = [0u8; 1];
            let n = loop {
                match self.reader.read(&mut byte) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            };
            if n == 0 {
                return if i == 0 {
                    Ok(None)
                } else {
                    Err(DecodeError::Truncated)
                };
            }
            value |= u64::from(byte[0] & 0x7f) << (7 * i);
            if byte[0] & 0x80 == 0 {
                return usize::try_from(value)
                    .map(Some)
                    .map_err(|_| DecodeError::InvalidLength);
            }
        }
        Err(DecodeError::InvalidLength)
    }
}

/// Decodes batches from a remote tracer stream
///
/// Each batch is available as soon as its frame has been flushed by the
/// sender; the reader does not wait for the end of the gzip stream.
pub struct BatchReader<R: Read> {
    frames: DelimitedReader<GzDecoder<R>>,
}

impl<R: Read> BatchReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            frames: DelimitedReader::new(GzDecoder::new(reader)),
        }
    }

    #[must_use]
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.frames = self.frames.with_max_frame_size(max);
        self
    }

    /// Next batch with events left encoded
    pub fn next_raw_batch(&mut self) -> Result<Option<RawBatch>, DecodeError> {
        match self.frames.next_frame()? {
            Some(frame) => Ok(Some(RawBatch::decode(frame)?)),
            None => Ok(None),
        }
    }

    /// Next batch decoded as `E`
    pub fn next_batch<E: Message + Default>(&mut self) -> Result<Option<Vec<E>>, DecodeError> {
        match self.next_raw_batch()? {
            Some(raw) => raw.decode_events().map(Some),
            None => Ok(None),
        }
    }
}

/// Incremental decoder for a remote tracer stream
///
/// Compressed bytes go in through [`feed`](Self::feed) in whatever chunks the
/// socket delivers; complete batches come out of
/// [`next_raw_batch`](Self::next_raw_batch).
pub struct BatchDecoder {
    /// Decompressed bytes accumulate in the inner `Vec`
    gzip: GzWriteDecoder<Vec<u8>>,
    /// Bytes of the inner `Vec` already returned as batches
    consumed: usize,
    max_frame_size: usize,
}

impl Default for BatchDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchDecoder {
    pub fn new() -> Self {
        Self {
            gzip: GzWriteDecoder::new(Vec::new()),
            consumed: 0,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    #[must_use]
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Decompress a chunk of the stream
    pub fn feed(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        self.compact();
        self.gzip.write_all(data)?;
        self.gzip.flush()?;
        Ok(())
    }

    /// Next batch completed by the bytes fed so far
    pub fn next_raw_batch(&mut self) -> Result<Option<RawBatch>, DecodeError> {
        let pending = &self.gzip.get_ref()[self.consumed..];
        let Some((len, prefix)) = peek_length(pending)? else {
            return Ok(None);
        };
        if len > self.max_frame_size {
            return Err(DecodeError::FrameTooLarge {
                len,
                max: self.max_frame_size,
            });
        }
        if pending.len() - prefix < len {
            return Ok(None);
        }

        let batch = RawBatch::decode(&pending[prefix..prefix + len])?;
        self.consumed += prefix + len;
        Ok(Some(batch))
    }

    /// Check that the stream ended cleanly
    ///
    /// Fails if the gzip trailer is missing or a frame was cut short.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        self.gzip.try_finish()?;
        if self.consumed < self.gzip.get_ref().len() {
            return Err(DecodeError::Truncated);
        }
        Ok(())
    }

    /// Drop decompressed bytes that were already returned
    fn compact(&mut self) {
        if self.consumed > 0 {
            self.gzip.get_mut().drain(..self.consumed);
            self.consumed = 0;
        }
    }
}

/// Length and prefix size of the frame at the start of `data`, if the whole
/// prefix is present
fn peek_length(data: &[u8]) -> Result<Option<(usize, usize)>, DecodeError> {
    let mut value: u64 = 0;
    for (i, byte) in data.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return usize::try_from(value)
                .map(|len| Some((len, i + 1)))
                .map_err(|_| DecodeError::InvalidLength);
        }
    }
    if data.len() >= MAX_VARINT_LEN {
        Err(DecodeError::InvalidLength)
    } else {
        Ok(None)
    }
}

/// Read every event from a length-delimited trace file
pub fn read_delimited<E: Message + Default>(path: impl AsRef<Path>) -> Result<Vec<E>, DecodeError> {
    let file = File::open(path)?;
    let mut frames = DelimitedReader::new(BufReader::new(file));
    let mut events = Vec::new();
    while let Some(frame) = frames.next_frame()? {
        events.push(E::decode(frame)?);
    }
    Ok(events)
}

#[cfg(test)]
#[path = "reader_test.rs"]
mod reader_test;
