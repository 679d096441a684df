//! Per-file driver: capture frames in, rows and diagnostics out.
//!
//! Each frame is unwrapped, decoded, filtered and emitted before the next one
//! is read. The only state carried between frames is the `Diagnostics`
//! accumulator, which is passed in and handed back to the caller.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use hashbrown::{HashMap, HashSet};
use log::{debug, error, info, trace, warn};
use num_format::{Locale, ToFormattedString};
use serde::Serialize;

use crate::capture::{CaptureReader, FrameRecord};
use crate::emitter::{Emitted, PriceLevelRow, RecordEmitter, RowSink, TradeRow};
use crate::error::{CaptureError, FrameError, SinkError};
use crate::filter::SymbolFilter;
use crate::frame::{Discard, FrameUnwrapper, Unwrapped};
use crate::message::{decode_message, message_type_name, Message, SystemEventCode};
use crate::segment::decode_segment;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageStats {
    pub count: u64,
    pub total_length: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub frames_read: u64,
    pub frames_unsupported_link: u64,
    pub frames_not_ipv4_udp: u64,
    pub frames_fragmented: u64,
    pub frames_truncated: u64,
    pub segments_decoded: u64,
    pub segments_discarded: u64,
    pub segments_truncated: u64,
    pub messages_declared: u64,
    pub messages_extracted: u64,
    pub trade_rows: u64,
    pub price_level_rows: u64,
    pub system_events: u64,
    pub start_of_messages_seen: bool,
    pub end_of_messages_seen: bool,
    pub messages_unknown: u64,
    pub messages_malformed: u64,
    pub messages_filtered_out: u64,
    pub message_stats: HashMap<u8, MessageStats>,
    pub unknown_message_types: HashSet<u8>,
    pub cancelled: bool,
    /// The file was rejected before any frame could be read.
    pub fatal_error: Option<String>,
    /// The frame stream ended early; rows emitted before it remain valid.
    pub stream_error: Option<String>,
}

impl Diagnostics {
    pub fn frames_discarded(&self) -> u64 {
        self.frames_unsupported_link + self.frames_not_ipv4_udp + self.frames_fragmented + self.frames_truncated
    }

    /// Unknown and malformed messages.
    pub fn messages_skipped(&self) -> u64 {
        self.messages_unknown + self.messages_malformed
    }

    /// Every extracted message ends up in exactly one of these buckets.
    pub fn messages_accounted(&self) -> u64 {
        self.trade_rows
            + self.price_level_rows
            + self.system_events
            + self.messages_filtered_out
            + self.messages_skipped()
    }

    pub fn log_summary(&self, verbose: bool) {
        let fmt = |n: u64| n.to_formatted_string(&Locale::en);
        info!(
            "Frames read: {}, discarded: {} (unsupported link: {}, not IPv4/UDP: {}, fragments: {}, truncated: {})",
            fmt(self.frames_read),
            fmt(self.frames_discarded()),
            fmt(self.frames_unsupported_link),
            fmt(self.frames_not_ipv4_udp),
            fmt(self.frames_fragmented),
            fmt(self.frames_truncated)
        );
        info!(
            "Segments decoded: {}, discarded: {}, truncated: {}",
            fmt(self.segments_decoded),
            fmt(self.segments_discarded),
            fmt(self.segments_truncated)
        );
        info!(
            "Messages extracted: {} of {} declared; trade rows: {}, price level rows: {}, system events: {}, filtered out: {}, unknown: {}, malformed: {}",
            fmt(self.messages_extracted),
            fmt(self.messages_declared),
            fmt(self.trade_rows),
            fmt(self.price_level_rows),
            fmt(self.system_events),
            fmt(self.messages_filtered_out),
            fmt(self.messages_unknown),
            fmt(self.messages_malformed)
        );

        if verbose {
            let mut sorted_stats: Vec<_> = self.message_stats.iter().collect();
            sorted_stats.sort_by_key(|&(message_type, _)| *message_type);
            for (message_type, stats) in sorted_stats {
                info!(
                    "Message type: 0x{:02X} ({}), count: {}, total length: {}",
                    message_type,
                    message_type_name(*message_type),
                    fmt(stats.count),
                    fmt(stats.total_length)
                );
            }
        }

        if !self.unknown_message_types.is_empty() {
            let mut types: Vec<_> = self.unknown_message_types.iter().copied().collect();
            types.sort_unstable();
            warn!(
                "Encountered unsupported message types: {}",
                types.iter().map(|t| format!("0x{:02X}", t)).collect::<Vec<_>>().join(", ")
            );
        }
        if self.frames_read > 0 && !self.end_of_messages_seen && self.stream_error.is_none() && !self.cancelled {
            debug!("Capture ended without an end-of-messages system event");
        }
    }
}

/// Opens `path` and runs every frame through the pipeline. Failing to open or
/// validate the capture is recorded in `fatal_error` rather than returned; only
/// sink failures are errors here.
pub fn process_file<Pth, F, T, P>(
    path: Pth,
    filter: &F,
    emitter: &mut RecordEmitter<T, P>,
    stop: &AtomicBool,
    mut diagnostics: Diagnostics,
) -> Result<Diagnostics, SinkError>
where
    Pth: AsRef<Path>,
    F: SymbolFilter + ?Sized,
    T: RowSink<TradeRow>,
    P: RowSink<PriceLevelRow>,
{
    let reader = match CaptureReader::open(path.as_ref()) {
        Ok(reader) => reader,
        Err(e) => {
            error!("Cannot read capture {}: {}", path.as_ref().display(), e);
            diagnostics.fatal_error = Some(e.to_string());
            emitter.flush()?;
            return Ok(diagnostics);
        }
    };
    let unwrapper = FrameUnwrapper::for_link_type(reader.header().link_type);
    process_frames(reader, unwrapper, filter, emitter, stop, diagnostics)
}

/// Drives `frames` to completion, to the first capture error, or until `stop`
/// is set. `stop` is checked before each frame is pulled.
pub fn process_frames<I, F, T, P>(
    frames: I,
    unwrapper: FrameUnwrapper,
    filter: &F,
    emitter: &mut RecordEmitter<T, P>,
    stop: &AtomicBool,
    mut diagnostics: Diagnostics,
) -> Result<Diagnostics, SinkError>
where
    I: IntoIterator<Item = Result<FrameRecord, CaptureError>>,
    F: SymbolFilter + ?Sized,
    T: RowSink<TradeRow>,
    P: RowSink<PriceLevelRow>,
{
    let mut frames = frames.into_iter();
    loop {
        if stop.load(Ordering::Relaxed) {
            info!("Stop requested after {} frames", diagnostics.frames_read);
            diagnostics.cancelled = true;
            break;
        }
        let frame = match frames.next() {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!("Capture ended early: {}", e);
                diagnostics.stream_error = Some(e.to_string());
                break;
            }
            None => break,
        };
        diagnostics.frames_read += 1;
        process_frame(&frame, &unwrapper, filter, emitter, &mut diagnostics)?;
    }

    emitter.flush()?;
    Ok(diagnostics)
}

fn process_frame<F, T, P>(
    frame: &FrameRecord,
    unwrapper: &FrameUnwrapper,
    filter: &F,
    emitter: &mut RecordEmitter<T, P>,
    diagnostics: &mut Diagnostics,
) -> Result<(), SinkError>
where
    F: SymbolFilter + ?Sized,
    T: RowSink<TradeRow>,
    P: RowSink<PriceLevelRow>,
{
    let payload = match unwrapper.unwrap(&frame.data) {
        Ok(Unwrapped::Payload(payload)) => payload,
        Ok(Unwrapped::Discarded(Discard::Fragment)) => {
            diagnostics.frames_fragmented += 1;
            return Ok(());
        }
        Ok(Unwrapped::Discarded(Discard::UnsupportedLinkType { .. })) => {
            diagnostics.frames_unsupported_link += 1;
            return Ok(());
        }
        Ok(Unwrapped::Discarded(reason)) => {
            trace!("Frame {} skipped: {:?}", frame.frame_number, reason);
            diagnostics.frames_not_ipv4_udp += 1;
            return Ok(());
        }
        Err(e) => {
            warn!("Frame {} discarded: {}", frame.frame_number, e);
            diagnostics.frames_truncated += 1;
            return Ok(());
        }
    };

    let segment = match decode_segment(payload) {
        Ok(segment) => segment,
        Err(e @ FrameError::ExcessiveMessageCount(_)) => {
            warn!("Frame {} segment discarded: {}", frame.frame_number, e);
            diagnostics.segments_discarded += 1;
            return Ok(());
        }
        Err(e) => {
            warn!("Frame {} discarded: {}", frame.frame_number, e);
            diagnostics.frames_truncated += 1;
            return Ok(());
        }
    };

    diagnostics.segments_decoded += 1;
    diagnostics.messages_declared += u64::from(segment.header.message_count);
    diagnostics.messages_extracted += segment.messages.len() as u64;
    if let Some(truncation) = &segment.truncation {
        warn!("Frame {}: {}", frame.frame_number, truncation);
        diagnostics.segments_truncated += 1;
    }

    let capture_time_ns = frame.capture_time_ns();
    for raw in &segment.messages {
        let stats = diagnostics
            .message_stats
            .entry(raw.message_type().unwrap_or(0))
            .or_default();
        stats.count += 1;
        stats.total_length += raw.len() as u64;

        let decoded = match decode_message(raw, segment.send_time_ns()) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Frame {}: {}", frame.frame_number, e);
                diagnostics.messages_malformed += 1;
                continue;
            }
        };

        match &decoded.message {
            Message::SystemEvent(event) => {
                info!(
                    "System event '{}' ({}) at {}",
                    event.code.code() as char,
                    event.code.description(),
                    event.timestamp_ns
                );
                diagnostics.system_events += 1;
                match event.code {
                    SystemEventCode::StartOfMessages => diagnostics.start_of_messages_seen = true,
                    SystemEventCode::EndOfMessages => diagnostics.end_of_messages_seen = true,
                    _ => {}
                }
                continue;
            }
            Message::Unknown { message_type, .. } => {
                diagnostics.messages_unknown += 1;
                diagnostics.unknown_message_types.insert(*message_type);
                continue;
            }
            Message::TradeReport(_) | Message::PriceLevelUpdate(_) => {}
        }

        if let Some(symbol) = decoded.message.symbol() {
            if !filter.included(symbol) {
                diagnostics.messages_filtered_out += 1;
                continue;
            }
        }

        match emitter.emit(capture_time_ns, &decoded)? {
            Emitted::Trade => diagnostics.trade_rows += 1,
            Emitted::PriceLevel => diagnostics.price_level_rows += 1,
            Emitted::Nothing => {}
        }
    }

    Ok(())
}
