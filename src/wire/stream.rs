// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The segment-framed stream (§4.3): a chunk-safe encoder/decoder pair for
//! the `head` / `item*` / `tail` framing shared by both directions of the
//! half-duplex HTTP exchange.
//!
//! The decoder is re-entrant: [`StreamDecoder::push`] may be called with
//! arbitrarily small chunks, including chunks that split a segment's
//! length prefix or payload mid-way, and it always yields exactly the
//! segments whose bytes have fully arrived, in order.

use std::io::{Read, Write};

use crate::error::ProtocolError;

use super::primitive;

/// The wire format version this build speaks. Bumping the shared
/// dictionary or segment framing requires bumping this.
pub const WIRE_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    Head,
    Item,
    Tail,
}

impl SegmentKind {
    fn lowercase_code(self) -> u8 {
        match self {
            SegmentKind::Head => b'h',
            SegmentKind::Item => b'i',
            SegmentKind::Tail => b't',
        }
    }

    fn uppercase_code(self) -> u8 {
        match self {
            SegmentKind::Head => b'H',
            SegmentKind::Item => b'I',
            SegmentKind::Tail => b'T',
        }
    }

    fn from_type_code(code: u8) -> Result<(SegmentKind, bool), ProtocolError> {
        match code {
            b'h' => Ok((SegmentKind::Head, false)),
            b'H' => Ok((SegmentKind::Head, true)),
            b'i' => Ok((SegmentKind::Item, false)),
            b'I' => Ok((SegmentKind::Item, true)),
            b't' => Ok((SegmentKind::Tail, false)),
            b'T' => Ok((SegmentKind::Tail, true)),
            other => Err(ProtocolError::UnknownSegmentType(other)),
        }
    }
}

/// A fully-decoded segment, payload already gunzipped if it was compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A `head` segment.
    Head(Vec<u8>),
    /// An `item` segment.
    Item(Vec<u8>),
    /// A `tail` segment.
    Tail(Vec<u8>),
}

/// Gzip compression policy for outgoing segments (§4.3): a segment is sent
/// compressed only if doing so both saves a minimum fraction and a minimum
/// absolute number of bytes.
#[derive(Debug, Clone, Copy)]
pub struct CompressionConfig {
    /// Minimum payload size before compression is even attempted.
    pub min_payload_bytes: usize,
    /// Minimum fraction of bytes that must be saved, e.g. `0.1` for 10%.
    pub savings_threshold: f64,
    /// Minimum absolute number of bytes that must be saved.
    pub min_bytes_saved: u64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig { min_payload_bytes: 64, savings_threshold: 0.1, min_bytes_saved: 256 }
    }
}

/// Resource limits enforced by [`StreamDecoder`] (§4.3, §7 Protocol errors).
#[derive(Debug, Clone, Copy)]
pub struct StreamLimits {
    /// Maximum size of any single segment's payload, compressed or not.
    pub max_segment_bytes: u64,
    /// Maximum cumulative size of bytes fed to the decoder across the
    /// whole stream.
    pub max_stream_bytes: u64,
}

impl Default for StreamLimits {
    fn default() -> Self {
        StreamLimits { max_segment_bytes: 16 * 1024 * 1024, max_stream_bytes: 256 * 1024 * 1024 }
    }
}

fn gzip_compress(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}

fn gzip_decompress(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut decoder = flate2::read::GzDecoder::new(payload);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|_| ProtocolError::InvalidCompressedPayload)?;
    Ok(out)
}

/// Builds an outgoing segment-framed stream: a version byte, an optional
/// `head`, zero or more `item`s, and an optional `tail` closing it.
pub struct StreamEncoder {
    out: Vec<u8>,
    compression: CompressionConfig,
    wrote_tail: bool,
}

impl StreamEncoder {
    /// Start a new stream with the given compression policy.
    pub fn new(compression: CompressionConfig) -> Self {
        StreamEncoder { out: vec![WIRE_VERSION], compression, wrote_tail: false }
    }

    fn maybe_compress(&self, kind: SegmentKind, payload: &[u8]) -> (u8, Vec<u8>) {
        if payload.len() < self.compression.min_payload_bytes {
            return (kind.lowercase_code(), payload.to_vec());
        }
        if let Ok(compressed) = gzip_compress(payload) {
            let saved = payload.len().saturating_sub(compressed.len()) as u64;
            let ratio = saved as f64 / payload.len() as f64;
            if saved >= self.compression.min_bytes_saved && ratio >= self.compression.savings_threshold {
                return (kind.uppercase_code(), compressed);
            }
        }
        (kind.lowercase_code(), payload.to_vec())
    }

    fn write_segment(&mut self, kind: SegmentKind, payload: &[u8]) {
        let (type_code, bytes) = self.maybe_compress(kind, payload);
        self.out.push(type_code);
        primitive::pack_varint(bytes.len() as u64, &mut self.out);
        self.out.extend_from_slice(&bytes);
    }

    /// Write the `head` segment. Must be the first segment in the stream.
    pub fn write_head(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        if self.out.len() != 1 {
            return Err(ProtocolError::HeadAfterItem);
        }
        self.write_segment(SegmentKind::Head, payload);
        Ok(())
    }

    /// Write an `item` segment.
    pub fn write_item(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        if self.wrote_tail {
            return Err(ProtocolError::DataAfterTail);
        }
        self.write_segment(SegmentKind::Item, payload);
        Ok(())
    }

    /// Write the closing `tail` segment. At most one is permitted.
    pub fn write_tail(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        if self.wrote_tail {
            return Err(ProtocolError::MultipleTails);
        }
        self.wrote_tail = true;
        self.write_segment(SegmentKind::Tail, payload);
        Ok(())
    }

    /// Consume the encoder, returning the complete stream bytes so far.
    pub fn finish(self) -> Vec<u8> {
        self.out
    }
}

#[derive(Debug, Clone, Copy)]
enum DecoderState {
    AwaitingVersion,
    AwaitingTypeCode,
    AwaitingLength { type_code: u8 },
    AwaitingPayload { type_code: u8, len: usize },
}

/// A chunk-safe, re-entrant decoder for the stream [`StreamEncoder`] writes.
pub struct StreamDecoder {
    buf: Vec<u8>,
    state: DecoderState,
    limits: StreamLimits,
    total_bytes: u64,
    saw_head: bool,
    saw_item_or_tail: bool,
    saw_tail: bool,
}

impl StreamDecoder {
    /// Start a new decoder with the given resource limits.
    pub fn new(limits: StreamLimits) -> Self {
        StreamDecoder {
            buf: Vec::new(),
            state: DecoderState::AwaitingVersion,
            limits,
            total_bytes: 0,
            saw_head: false,
            saw_item_or_tail: false,
            saw_tail: false,
        }
    }

    /// Feed the next chunk of bytes, returning every segment that became
    /// fully available as a result. May return an empty vec if `chunk`
    /// only completed a partial length prefix or payload.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Segment>, ProtocolError> {
        self.buf.extend_from_slice(chunk);
        self.total_bytes += chunk.len() as u64;
        if self.total_bytes > self.limits.max_stream_bytes {
            return Err(ProtocolError::StreamTooLarge { max: self.limits.max_stream_bytes });
        }

        let mut segments = Vec::new();
        loop {
            match self.state {
                DecoderState::AwaitingVersion => {
                    let Some(&version) = self.buf.first() else { break };
                    if version != WIRE_VERSION {
                        return Err(ProtocolError::UnknownVersion(version));
                    }
                    self.buf.drain(..1);
                    self.state = DecoderState::AwaitingTypeCode;
                }
                DecoderState::AwaitingTypeCode => {
                    let Some(&type_code) = self.buf.first() else { break };
                    self.buf.drain(..1);
                    self.state = DecoderState::AwaitingLength { type_code };
                }
                DecoderState::AwaitingLength { type_code } => match try_unpack_varint(&self.buf) {
                    Some((len, consumed)) => {
                        if len > self.limits.max_segment_bytes {
                            return Err(ProtocolError::SegmentTooLarge { len, max: self.limits.max_segment_bytes });
                        }
                        self.buf.drain(..consumed);
                        self.state = DecoderState::AwaitingPayload { type_code, len: len as usize };
                    }
                    None => break,
                },
                DecoderState::AwaitingPayload { type_code, len } => {
                    if self.buf.len() < len {
                        break;
                    }
                    let (kind, compressed) = SegmentKind::from_type_code(type_code)?;
                    let raw: Vec<u8> = self.buf.drain(..len).collect();
                    let payload = if compressed { gzip_decompress(&raw)? } else { raw };

                    match kind {
                        SegmentKind::Head => {
                            if self.saw_head || self.saw_item_or_tail {
                                return Err(ProtocolError::HeadAfterItem);
                            }
                            self.saw_head = true;
                        }
                        SegmentKind::Item => {
                            if self.saw_tail {
                                return Err(ProtocolError::DataAfterTail);
                            }
                            self.saw_item_or_tail = true;
                        }
                        SegmentKind::Tail => {
                            if self.saw_tail {
                                return Err(ProtocolError::MultipleTails);
                            }
                            self.saw_tail = true;
                            self.saw_item_or_tail = true;
                        }
                    }

                    segments.push(match kind {
                        SegmentKind::Head => Segment::Head(payload),
                        SegmentKind::Item => Segment::Item(payload),
                        SegmentKind::Tail => Segment::Tail(payload),
                    });
                    self.state = DecoderState::AwaitingTypeCode;
                }
            }
        }
        Ok(segments)
    }
}

/// Like [`primitive::unpack_varint`] but returns `None` (instead of a
/// sentinel) when the buffer ends before the continuation bit clears, so
/// the decoder can tell "malformed" apart from "not here yet".
fn try_unpack_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    let mut i = 0usize;
    loop {
        let byte = *buf.get(i)?;
        value |= u64::from(byte & 0x3F) << shift;
        i += 1;
        if byte & 0x40 == 0 {
            return Some((value, i));
        }
        shift += 6;
        if shift >= 64 {
            return Some((value, i));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stream() -> Vec<u8> {
        let mut enc = StreamEncoder::new(CompressionConfig::default());
        enc.write_head(b"head-payload").unwrap();
        enc.write_item(b"item-one").unwrap();
        enc.write_item(b"item-two").unwrap();
        enc.write_tail(b"tail-payload").unwrap();
        enc.finish()
    }

    #[test]
    fn decodes_whole_stream_in_one_push() {
        let bytes = sample_stream();
        let mut dec = StreamDecoder::new(StreamLimits::default());
        let segments = dec.push(&bytes).unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Head(b"head-payload".to_vec()),
                Segment::Item(b"item-one".to_vec()),
                Segment::Item(b"item-two".to_vec()),
                Segment::Tail(b"tail-payload".to_vec()),
            ]
        );
    }

    #[test]
    fn decodes_split_across_arbitrary_byte_chunks() {
        let bytes = sample_stream();
        let mut dec = StreamDecoder::new(StreamLimits::default());
        let mut all = Vec::new();
        for byte in bytes {
            all.extend(dec.push(&[byte]).unwrap());
        }
        assert_eq!(all.len(), 4);
        assert!(matches!(all[0], Segment::Head(_)));
        assert!(matches!(all[1], Segment::Item(_)));
        assert!(matches!(all[2], Segment::Item(_)));
        assert!(matches!(all[3], Segment::Tail(_)));
    }

    #[test]
    fn decodes_split_at_arbitrary_chunk_offsets() {
        let bytes = sample_stream();
        let mut dec = StreamDecoder::new(StreamLimits::default());
        let mut all = Vec::new();
        for chunk in bytes.chunks(3) {
            all.extend(dec.push(chunk).unwrap());
        }
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut dec = StreamDecoder::new(StreamLimits::default());
        let err = dec.push(&[0xFF]).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownVersion(0xFF)));
    }

    #[test]
    fn rejects_unknown_segment_type() {
        let mut dec = StreamDecoder::new(StreamLimits::default());
        let err = dec.push(&[WIRE_VERSION, b'z', 0x00]).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownSegmentType(b'z')));
    }

    #[test]
    fn rejects_second_head_as_head_after_item() {
        let mut enc = StreamEncoder::new(CompressionConfig::default());
        enc.write_head(b"h1").unwrap();
        enc.write_item(b"i1").unwrap();
        let bytes = enc.finish();
        let mut dec = StreamDecoder::new(StreamLimits::default());
        dec.push(&bytes).unwrap();
        // Manually splice in another head segment after the stream "ended".
        let mut more = vec![b'h'];
        primitive::pack_varint(2, &mut more);
        more.extend_from_slice(b"h2");
        let err = dec.push(&more).unwrap_err();
        assert!(matches!(err, ProtocolError::HeadAfterItem));
    }

    #[test]
    fn rejects_data_after_tail() {
        let bytes = sample_stream();
        let mut dec = StreamDecoder::new(StreamLimits::default());
        dec.push(&bytes).unwrap();
        let mut more = vec![b'i'];
        primitive::pack_varint(4, &mut more);
        more.extend_from_slice(b"oops");
        let err = dec.push(&more).unwrap_err();
        assert!(matches!(err, ProtocolError::DataAfterTail));
    }

    #[test]
    fn rejects_multiple_tails() {
        let mut enc = StreamEncoder::new(CompressionConfig::default());
        enc.write_tail(b"t1").unwrap();
        assert!(matches!(enc.write_tail(b"t2"), Err(ProtocolError::MultipleTails)));
    }

    #[test]
    fn large_payload_compresses_and_roundtrips() {
        let payload = vec![b'x'; 10_000];
        let mut enc = StreamEncoder::new(CompressionConfig::default());
        enc.write_item(&payload).unwrap();
        let bytes = enc.finish();
        // Compressed form must be substantially smaller than the raw payload.
        assert!(bytes.len() < payload.len() / 2);
        let mut dec = StreamDecoder::new(StreamLimits::default());
        let segments = dec.push(&bytes).unwrap();
        assert_eq!(segments, vec![Segment::Item(payload)]);
    }

    #[test]
    fn oversized_segment_is_rejected() {
        let limits = StreamLimits { max_segment_bytes: 4, max_stream_bytes: 1024 };
        let mut dec = StreamDecoder::new(limits);
        let mut bytes = vec![WIRE_VERSION, b'i'];
        primitive::pack_varint(100, &mut bytes);
        let err = dec.push(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::SegmentTooLarge { .. }));
    }
}
