//! Error types for each decoding layer.
//!
//! Only `CaptureError` and `SinkError` ever stop a run. `FrameError` always
//! discards a single frame, segment or message and processing carries on.

use std::io;
use thiserror::Error;

/// A read past the end of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("truncated data: needed {needed} bytes, {remaining} remaining")]
pub struct CursorError {
    pub needed: usize,
    pub remaining: usize,
}

/// File level failures. The first two are fatal before any frame is read,
/// the rest end the frame stream early.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid capture magic: 0x{0:08x}")]
    InvalidCaptureMagic(u32),

    #[error("truncated capture: {context} needed {needed} bytes, {available} available")]
    TruncatedCapture {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("frame {frame_number}: captured length {captured_len} exceeds snaplen {snaplen}")]
    OversizedRecord {
        frame_number: u64,
        captured_len: u32,
        snaplen: u32,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Non-fatal failures scoped to one frame, segment or message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("truncated frame in {layer} header: {source}")]
    TruncatedFrame {
        layer: &'static str,
        #[source]
        source: CursorError,
    },

    #[error("invalid IPv4 header length: {0} bytes")]
    InvalidIpv4HeaderLength(usize),

    #[error("segment declares {0} messages, more than the allowed maximum")]
    ExcessiveMessageCount(u16),

    #[error("truncated segment: extracted {extracted} of {declared} messages")]
    TruncatedSegment { extracted: usize, declared: u16 },

    #[error("malformed message body (type 0x{message_type:02X}): {len} bytes, needed {needed}")]
    MalformedMessageBody {
        message_type: u8,
        len: usize,
        needed: usize,
    },

    #[error("empty symbol in message type 0x{0:02X}")]
    EmptySymbol(u8),
}

impl FrameError {
    pub(crate) fn truncated(layer: &'static str) -> impl FnOnce(CursorError) -> FrameError {
        move |source| FrameError::TruncatedFrame { layer, source }
    }
}

/// Failures writing rows to an output sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
