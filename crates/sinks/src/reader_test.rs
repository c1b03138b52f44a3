use super::*;
use crate::encoder::{Delimited, EventEncoder, encode_batch};
use crate::test_utils::{TestEvent, events};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use tempfile::NamedTempFile;

fn delimited(events: &[TestEvent]) -> Vec<u8> {
    let mut out = Vec::new();
    for event in events {
        Delimited.encode(event, &mut out).unwrap();
    }
    out
}

/// A remote stream: gzip with a sync flush after every batch
fn remote_stream(batches: &[Vec<TestEvent>], finish: bool) -> Vec<u8> {
    let mut gzip = GzEncoder::new(Vec::new(), Compression::default());
    for batch in batches {
        let mut frame = Vec::new();
        encode_batch(batch, &mut frame).unwrap();
        gzip.write_all(&frame).unwrap();
        gzip.flush().unwrap();
    }
    if finish {
        gzip.finish().unwrap()
    } else {
        gzip.get_ref().clone()
    }
}

// =============================================================================
// DelimitedReader
// =============================================================================

#[test]
fn test_delimited_reader_frames() {
    let data = delimited(&events(3));
    let mut reader = DelimitedReader::new(&data[..]);

    let mut count = 0;
    while let Some(frame) = reader.next_frame().unwrap() {
        assert_eq!(TestEvent::decode(frame).unwrap().seq, count);
        count += 1;
    }
    assert_eq!(count, 3);
}

#[test]
fn test_delimited_reader_empty_input() {
    let mut reader = DelimitedReader::new(&[0u8; 0][..]);
    assert!(reader.next_frame().unwrap().is_none());
}

#[test]
fn test_delimited_reader_truncated_frame() {
    let mut data = delimited(&[TestEvent::new("truncated", 1)]);
    data.pop();

    let mut reader = DelimitedReader::new(&data[..]);
    assert!(matches!(reader.next_frame(), Err(DecodeError::Truncated)));
}

#[test]
fn test_delimited_reader_truncated_length() {
    let data = [0x80u8];
    let mut reader = DelimitedReader::new(&data[..]);
    assert!(matches!(reader.next_frame(), Err(DecodeError::Truncated)));
}

#[test]
fn test_delimited_reader_overlong_varint() {
    let data = [0xffu8; 11];
    let mut reader = DelimitedReader::new(&data[..]);
    assert!(matches!(reader.next_frame(), Err(DecodeError::InvalidLength)));
}

#[test]
fn test_delimited_reader_frame_limit() {
    let data = delimited(&[TestEvent::new(&"x".repeat(100), 1)]);
    let mut reader = DelimitedReader::new(&data[..]).with_max_frame_size(16);
    assert!(matches!(
        reader.next_frame(),
        Err(DecodeError::FrameTooLarge { max: 16, .. })
    ));
}

// =============================================================================
// BatchReader
// =============================================================================

#[test]
fn test_batch_reader_finished_stream() {
    let batches = vec![events(3), events(5)];
    let data = remote_stream(&batches, true);

    let mut reader = BatchReader::new(&data[..]);
    assert_eq!(reader.next_batch::<TestEvent>().unwrap().unwrap(), batches[0]);
    assert_eq!(reader.next_batch::<TestEvent>().unwrap().unwrap(), batches[1]);
    assert!(reader.next_batch::<TestEvent>().unwrap().is_none());
}

#[test]
fn test_batch_reader_unfinished_stream_yields_flushed_batches() {
    let batches = vec![events(2), events(4)];
    let data = remote_stream(&batches, false);

    let mut reader = BatchReader::new(&data[..]);
    assert_eq!(reader.next_batch::<TestEvent>().unwrap().unwrap(), batches[0]);
    assert_eq!(reader.next_batch::<TestEvent>().unwrap().unwrap(), batches[1]);
    // No trailer: the stream ends abnormally.
    assert!(reader.next_batch::<TestEvent>().is_err());
}

#[test]
fn test_batch_reader_raw_events_keep_encoding() {
    let batch = vec![TestEvent::new("raw", 9)];
    let data = remote_stream(std::slice::from_ref(&batch), true);

    let mut reader = BatchReader::new(&data[..]);
    let raw = reader.next_raw_batch().unwrap().unwrap();
    assert_eq!(raw.batch.len(), 1);
    assert_eq!(raw.batch[0].as_ref(), batch[0].encode_to_vec().as_slice());
}

#[test]
fn test_batch_reader_rejects_plain_input() {
    let data = delimited(&events(1));
    let mut reader = BatchReader::new(&data[..]);
    assert!(reader.next_raw_batch().is_err());
}

// =============================================================================
// read_delimited
// =============================================================================

#[test]
fn test_read_delimited_file() {
    let expected = events(10);
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&delimited(&expected)).unwrap();
    file.flush().unwrap();

    let decoded: Vec<TestEvent> = read_delimited(file.path()).unwrap();
    assert_eq!(decoded, expected);
}

#[test]
fn test_read_delimited_missing_file() {
    let result = read_delimited::<TestEvent>("/nonexistent/trace.pb");
    assert!(matches!(result, Err(DecodeError::Io(_))));
}

// =============================================================================
// BatchDecoder
// =============================================================================

#[test]
fn test_batch_decoder_byte_at_a_time() {
    let batches = vec![events(3), events(1), events(7)];
    let data = remote_stream(&batches, true);

    let mut decoder = BatchDecoder::new();
    let mut decoded = Vec::new();
    for byte in &data {
        decoder.feed(std::slice::from_ref(byte)).unwrap();
        while let Some(raw) = decoder.next_raw_batch().unwrap() {
            decoded.push(raw.decode_events::<TestEvent>().unwrap());
        }
    }
    decoder.finish().unwrap();
    assert_eq!(decoded, batches);
}

#[test]
fn test_batch_decoder_batch_available_after_flush() {
    let first = events(2);
    let data = remote_stream(std::slice::from_ref(&first), false);

    let mut decoder = BatchDecoder::new();
    decoder.feed(&data).unwrap();
    let raw = decoder.next_raw_batch().unwrap().unwrap();
    assert_eq!(raw.decode_events::<TestEvent>().unwrap(), first);
    assert!(decoder.next_raw_batch().unwrap().is_none());
}

#[test]
fn test_batch_decoder_missing_trailer() {
    let data = remote_stream(&[events(1)], false);

    let mut decoder = BatchDecoder::new();
    decoder.feed(&data).unwrap();
    assert!(decoder.next_raw_batch().unwrap().is_some());
    assert!(decoder.finish().is_err());
}

#[test]
fn test_batch_decoder_frame_limit() {
    let data = remote_stream(&[events(50)], true);

    let mut decoder = BatchDecoder::new().with_max_frame_size(8);
    decoder.feed(&data).unwrap();
    assert!(matches!(
        decoder.next_raw_batch(),
        Err(DecodeError::FrameTooLarge { max: 8, .. })
    ));
}

#[test]
fn test_batch_decoder_rejects_plain_input() {
    let mut decoder = BatchDecoder::new();
    let result = decoder.feed(&delimited(&events(3)));
    assert!(result.is_err());
}
