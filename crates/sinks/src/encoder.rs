//! Event encoders
//!
//! Stateless serialization strategies applied to one event at a time by the
//! file tracer's write loop, plus the batch framing used on the remote wire.
//!
//! | Encoder | Record format | Event bound |
//! |---------|---------------|-------------|
//! | `JsonLines` | one JSON object per line | `serde::Serialize` |
//! | `Delimited` | varint length + protobuf message | `prost::Message` |
//! | `RawDelimited` | varint length + pre-encoded bytes | `Bytes` |

use bytes::Bytes;
use prost::Message;
use serde::Serialize;
use thiserror::Error;

/// Field number of the repeated event field in a `TraceEventBatch`
pub const BATCH_EVENTS_TAG: u32 = 1;

/// Serialization failure for a single event or batch
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protobuf encoding failed: {0}")]
    Protobuf(#[from] prost::EncodeError),
}

/// Serializes one event into an output buffer
///
/// Implementations append to `out`. On error, whatever was appended is
/// discarded by the caller.
pub trait EventEncoder<E>: Send + 'static {
    fn encode(&mut self, event: &E, out: &mut Vec<u8>) -> Result<(), EncodeError>;
}

/// Newline-delimited JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLines;

impl<E: Serialize> EventEncoder<E> for JsonLines {
    fn encode(&mut self, event: &E, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        serde_json::to_writer(&mut *out, event)?;
        out.push(b'\n');
        Ok(())
    }
}

/// Varint length-delimited protobuf records
#[derive(Debug, Clone, Copy, Default)]
pub struct Delimited;

impl<E: Message> EventEncoder<E> for Delimited {
    fn encode(&mut self, event: &E, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        event.encode_length_delimited(out)?;
        Ok(())
    }
}

/// Length-delimited records for events that are already protobuf-encoded
///
/// Produces the same file format as [`Delimited`] without decoding the event,
/// which is what a collector receiving opaque events needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDelimited;

impl EventEncoder<Bytes> for RawDelimited {
    fn encode(&mut self, event: &Bytes, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        prost::encode_length_delimiter(event.len(), out)?;
        out.extend_from_slice(event);
        Ok(())
    }
}

/// Encode `events` as one length-delimited `TraceEventBatch` frame
///
/// ```text
/// [varint: batch length][field 1: event 0][field 1: event 1]...
/// ```
pub fn encode_batch<E: Message>(events: &[E], out: &mut Vec<u8>) -> Result<(), EncodeError> {
    let len = prost::encoding::message::encoded_len_repeated(BATCH_EVENTS_TAG, events);
    out.reserve(prost::length_delimiter_len(len) + len);
    prost::encode_length_delimiter(len, out)?;
    prost::encoding::message::encode_repeated(BATCH_EVENTS_TAG, events, out);
    Ok(())
}

#[cfg(test)]
#[path = "encoder_test.rs"]
mod encoder_test;
