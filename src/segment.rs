//! IEX-TP segment framing.
//!
//! A segment is one UDP payload: a 40-byte little-endian header followed by
//! `message_count` messages, each prefixed by a 2-byte little-endian length.

use log::debug;
use serde::Serialize;

use crate::cursor::ByteCursor;
use crate::error::FrameError;

pub const SEGMENT_HEADER_LEN: usize = 40;

/// Segments declaring more messages than this are corrupt.
pub const MAX_MESSAGES_PER_SEGMENT: u16 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentHeader {
    pub version: u8,
    pub message_protocol_id: u16,
    pub channel_id: u32,
    pub session_id: u32,
    pub payload_len: u16,
    pub message_count: u16,
    pub stream_offset: u64,
    pub first_message_seq: u64,
    /// Nanoseconds since the epoch.
    pub send_time_ns: u64,
}

impl SegmentHeader {
    fn read(cursor: &mut ByteCursor<'_>) -> Result<Self, FrameError> {
        let truncated = FrameError::truncated("iex-tp");
        let mut header = || -> Result<Self, crate::error::CursorError> {
            let version = cursor.read_u8()?;
            cursor.skip(1)?;
            Ok(SegmentHeader {
                version,
                message_protocol_id: cursor.read_u16le()?,
                channel_id: cursor.read_u32le()?,
                session_id: cursor.read_u32le()?,
                payload_len: cursor.read_u16le()?,
                message_count: cursor.read_u16le()?,
                stream_offset: cursor.read_u64le()?,
                first_message_seq: cursor.read_u64le()?,
                send_time_ns: cursor.read_u64le()?,
            })
        };
        header().map_err(truncated)
    }
}

/// One length-delimited message. The first body byte is the message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMessage<'a> {
    pub body: &'a [u8],
}

impl<'a> RawMessage<'a> {
    pub fn message_type(&self) -> Option<u8> {
        self.body.first().copied()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Segment<'a> {
    pub header: SegmentHeader,
    pub messages: Vec<RawMessage<'a>>,
    /// Set when the payload ran out before `message_count` messages were
    /// read. `messages` still holds everything extracted before that point.
    pub truncation: Option<FrameError>,
}

impl<'a> Segment<'a> {
    pub fn send_time_ns(&self) -> u64 {
        self.header.send_time_ns
    }

    pub fn is_truncated(&self) -> bool {
        self.truncation.is_some()
    }
}

pub fn decode_segment(payload: &[u8]) -> Result<Segment<'_>, FrameError> {
    let mut cursor = ByteCursor::new(payload);
    let header = SegmentHeader::read(&mut cursor)?;

    if header.message_count > MAX_MESSAGES_PER_SEGMENT {
        return Err(FrameError::ExcessiveMessageCount(header.message_count));
    }
    if usize::from(header.payload_len) != cursor.remaining() {
        debug!(
            "Segment payload length {} does not match the {} bytes present",
            header.payload_len,
            cursor.remaining()
        );
    }

    let declared = header.message_count;
    let mut messages = Vec::with_capacity(usize::from(declared));
    let mut truncation = None;
    for _ in 0..declared {
        let next = cursor
            .read_u16le()
            .and_then(|len| cursor.read_bytes(usize::from(len)));
        match next {
            Ok(body) => messages.push(RawMessage { body }),
            Err(e) => {
                debug!("Segment cut short after {} of {} messages: {}", messages.len(), declared, e);
                truncation = Some(FrameError::TruncatedSegment {
                    extracted: messages.len(),
                    declared,
                });
                break;
            }
        }
    }

    Ok(Segment { header, messages, truncation })
}
