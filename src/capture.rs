//! Streaming reader for classic libpcap capture files.
//!
//! Gzip-compressed captures are detected by their magic bytes and inflated on
//! the fly. Frames are read one at a time; nothing beyond the current frame is
//! ever buffered.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use flate2::bufread::MultiGzDecoder;
use log::{debug, trace};
use nom::{
    bytes::complete::take,
    number::{complete as number, Endianness},
    IResult,
};
use serde::Serialize;

use crate::error::CaptureError;

pub const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
pub const GLOBAL_HEADER_LEN: usize = 24;
pub const RECORD_HEADER_LEN: usize = 16;
pub const LINKTYPE_ETHERNET: u32 = 1;

/// tcpdump's default and maximum snapshot length. Records claiming more than
/// this are treated as corrupt regardless of the declared snaplen.
pub const MAXIMUM_SNAPLEN: u32 = 262_144;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn endianness(self) -> Endianness {
        match self {
            ByteOrder::Little => Endianness::Little,
            ByteOrder::Big => Endianness::Big,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureHeader {
    pub byte_order: ByteOrder,
    pub version_major: u16,
    pub version_minor: u16,
    pub thiszone: i32,
    pub sigfigs: u32,
    pub snaplen: u32,
    pub link_type: u32,
}

impl CaptureHeader {
    /// Parses the 24-byte global header. The magic decides the byte order of
    /// every length field that follows in the file.
    pub fn parse(input: &[u8]) -> Result<Self, CaptureError> {
        let mut magic_bytes = [0u8; 4];
        let n = input.len().min(4);
        magic_bytes[..n].copy_from_slice(&input[..n]);

        let byte_order = if n < 4 {
            return Err(CaptureError::InvalidCaptureMagic(u32::from_le_bytes(magic_bytes)));
        } else if u32::from_le_bytes(magic_bytes) == PCAP_MAGIC {
            ByteOrder::Little
        } else if u32::from_be_bytes(magic_bytes) == PCAP_MAGIC {
            ByteOrder::Big
        } else {
            return Err(CaptureError::InvalidCaptureMagic(u32::from_le_bytes(magic_bytes)));
        };

        let truncated = || CaptureError::TruncatedCapture {
            context: "global header",
            needed: GLOBAL_HEADER_LEN,
            available: input.len(),
        };
        if input.len() < GLOBAL_HEADER_LEN {
            return Err(truncated());
        }

        parse_global_header(input, byte_order)
            .map(|(_, header)| header)
            .map_err(|_| truncated())
    }
}

fn parse_global_header(input: &[u8], byte_order: ByteOrder) -> IResult<&[u8], CaptureHeader> {
    let endian = byte_order.endianness();
    let (input, _magic) = take(4usize)(input)?;
    let (input, version_major) = number::u16(endian)(input)?;
    let (input, version_minor) = number::u16(endian)(input)?;
    let (input, thiszone) = number::i32(endian)(input)?;
    let (input, sigfigs) = number::u32(endian)(input)?;
    let (input, snaplen) = number::u32(endian)(input)?;
    let (input, link_type) = number::u32(endian)(input)?;
    Ok((input, CaptureHeader {
        byte_order,
        version_major,
        version_minor,
        thiszone,
        sigfigs,
        snaplen,
        link_type,
    }))
}

#[derive(Debug, Clone, Copy)]
struct RecordHeader {
    ts_sec: u32,
    ts_usec: u32,
    captured_len: u32,
    original_len: u32,
}

fn parse_record_header(input: &[u8], endian: Endianness) -> IResult<&[u8], RecordHeader> {
    let (input, ts_sec) = number::u32(endian)(input)?;
    let (input, ts_usec) = number::u32(endian)(input)?;
    let (input, captured_len) = number::u32(endian)(input)?;
    let (input, original_len) = number::u32(endian)(input)?;
    Ok((input, RecordHeader { ts_sec, ts_usec, captured_len, original_len }))
}

/// One captured frame, owning its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    /// 1-based position in the capture.
    pub frame_number: u64,
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub captured_len: u32,
    pub original_len: u32,
    pub data: Vec<u8>,
}

impl FrameRecord {
    /// Capture instant in nanoseconds since the epoch.
    pub fn capture_time_ns(&self) -> u64 {
        u64::from(self.ts_sec) * 1_000_000_000 + u64::from(self.ts_usec) * 1_000
    }

}

/// Pull-based frame source over one capture file.
///
/// Yields `Err` at most once; iteration is finished afterwards.
pub struct CaptureReader {
    reader: Box<dyn BufRead + Send>,
    header: CaptureHeader,
    compressed: bool,
    frame_number: u64,
    finished: bool,
}

impl CaptureReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let file = File::open(path.as_ref())?;
        debug!("Opened capture file: {}", path.as_ref().display());
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read + Send + 'static>(mut inner: R) -> Result<Self, CaptureError> {
        let mut prefix = [0u8; 2];
        let got = read_up_to(&mut inner, &mut prefix)?;
        let compressed = prefix[..got] == GZIP_MAGIC;
        let buffered = BufReader::new(io::Cursor::new(prefix[..got].to_vec()).chain(inner));

        let mut reader: Box<dyn BufRead + Send> = if compressed {
            debug!("Gzip magic detected, decompressing capture on the fly");
            Box::new(BufReader::new(MultiGzDecoder::new(buffered)))
        } else {
            Box::new(buffered)
        };

        let mut raw = [0u8; GLOBAL_HEADER_LEN];
        let got = read_up_to(&mut reader, &mut raw)?;
        let header = CaptureHeader::parse(&raw[..got])?;

        debug!(
            "Global header version {}.{}, byte order {:?}, snaplen {}, link type {}",
            header.version_major, header.version_minor, header.byte_order, header.snaplen, header.link_type
        );

        Ok(Self {
            reader,
            header,
            compressed,
            frame_number: 0,
            finished: false,
        })
    }

    pub fn header(&self) -> &CaptureHeader {
        &self.header
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Number of record headers consumed so far.
    pub fn frames_read(&self) -> u64 {
        self.frame_number
    }

    fn max_record_len(&self) -> u32 {
        match self.header.snaplen {
            0 => MAXIMUM_SNAPLEN,
            n => n.min(MAXIMUM_SNAPLEN),
        }
    }

    fn read_frame(&mut self) -> Result<Option<FrameRecord>, CaptureError> {
        let mut raw = [0u8; RECORD_HEADER_LEN];
        let got = read_up_to(&mut self.reader, &mut raw)?;
        if got == 0 {
            return Ok(None);
        }
        let truncated_header = CaptureError::TruncatedCapture {
            context: "record header",
            needed: RECORD_HEADER_LEN,
            available: got,
        };
        if got < RECORD_HEADER_LEN {
            return Err(truncated_header);
        }
        let (_, record) = parse_record_header(&raw, self.header.byte_order.endianness())
            .map_err(|_| truncated_header)?;

        self.frame_number += 1;
        if record.captured_len > self.max_record_len() {
            return Err(CaptureError::OversizedRecord {
                frame_number: self.frame_number,
                captured_len: record.captured_len,
                snaplen: self.header.snaplen,
            });
        }

        let len = record.captured_len as usize;
        let mut data = vec![0u8; len];
        let got = read_up_to(&mut self.reader, &mut data)?;
        if got < len {
            return Err(CaptureError::TruncatedCapture {
                context: "record body",
                needed: len,
                available: got,
            });
        }

        trace!("Frame {}: {} bytes captured of {}", self.frame_number, record.captured_len, record.original_len);

        Ok(Some(FrameRecord {
            frame_number: self.frame_number,
            ts_sec: record.ts_sec,
            ts_usec: record.ts_usec,
            captured_len: record.captured_len,
            original_len: record.original_len,
            data,
        }))
    }
}

impl Iterator for CaptureReader {
    type Item = Result<FrameRecord, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Fills as much of `buf` as the source can provide. A short count means end
/// of data; a gzip stream cut off mid-member counts as end of data too.
fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
