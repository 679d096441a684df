#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const CAPTURE_SEC: u32 = 1_647_875_400;
pub const CAPTURE_USEC: u32 = 123_456;
pub const CAPTURE_TIME_NS: u64 = 1_647_875_400_123_456_000;
pub const SEND_TIME_NS: u64 = 1_647_875_400_200_000_000;
pub const MESSAGE_TIME_NS: u64 = 1_647_875_400_100_000_000;

/// Builds a classic pcap file in memory.
pub struct CaptureBuilder {
    big_endian: bool,
    snaplen: u32,
    link_type: u32,
    records: Vec<u8>,
}

impl CaptureBuilder {
    pub fn new() -> Self {
        Self {
            big_endian: false,
            snaplen: 65_535,
            link_type: 1,
            records: Vec::new(),
        }
    }

    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    pub fn link_type(mut self, link_type: u32) -> Self {
        self.link_type = link_type;
        self
    }

    fn u16(&self, v: u16) -> [u8; 2] {
        if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() }
    }

    fn u32(&self, v: u32) -> [u8; 4] {
        if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() }
    }

    pub fn frame(mut self, ts_sec: u32, ts_usec: u32, data: &[u8]) -> Self {
        let len = data.len() as u32;
        let header = [self.u32(ts_sec), self.u32(ts_usec), self.u32(len), self.u32(len)].concat();
        self.records.extend_from_slice(&header);
        self.records.extend_from_slice(data);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.u32(0xa1b2_c3d4));
        out.extend_from_slice(&self.u16(2));
        out.extend_from_slice(&self.u16(4));
        out.extend_from_slice(&self.u32(0));
        out.extend_from_slice(&self.u32(0));
        out.extend_from_slice(&self.u32(self.snaplen));
        out.extend_from_slice(&self.u32(self.link_type));
        out.extend_from_slice(&self.records);
        out
    }
}

fn ipv4_udp(payload: &[u8], protocol: u8, flags_fragment: u16) -> Vec<u8> {
    let udp_len = 8 + payload.len();
    let total_len = 20 + udp_len;
    let mut out = vec![0x45, 0];
    out.extend_from_slice(&(total_len as u16).to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&flags_fragment.to_be_bytes());
    out.extend_from_slice(&[64, protocol, 0, 0]);
    out.extend_from_slice(&[10, 0, 0, 1, 233, 215, 21, 4]);
    out.extend_from_slice(&10_378u16.to_be_bytes());
    out.extend_from_slice(&10_378u16.to_be_bytes());
    out.extend_from_slice(&(udp_len as u16).to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(payload);
    out
}

fn ethernet(tags: &[u16], ethertype: u16, body: &[u8]) -> Vec<u8> {
    let mut out = vec![0x01, 0x00, 0x5e, 0x57, 0x15, 0x04, 0x00, 0x1b, 0x21, 0x3c, 0x9d, 0xf8];
    for tag in tags {
        out.extend_from_slice(&tag.to_be_bytes());
        out.extend_from_slice(&100u16.to_be_bytes());
    }
    out.extend_from_slice(&ethertype.to_be_bytes());
    out.extend_from_slice(body);
    out
}

pub fn udp_frame(payload: &[u8]) -> Vec<u8> {
    ethernet(&[], 0x0800, &ipv4_udp(payload, 17, 0))
}

pub fn vlan_udp_frame(payload: &[u8]) -> Vec<u8> {
    ethernet(&[0x88a8, 0x8100], 0x0800, &ipv4_udp(payload, 17, 0))
}

pub fn tcp_frame(payload: &[u8]) -> Vec<u8> {
    ethernet(&[], 0x0800, &ipv4_udp(payload, 6, 0))
}

pub fn fragment_frame(payload: &[u8]) -> Vec<u8> {
    ethernet(&[], 0x0800, &ipv4_udp(payload, 17, 0x2000))
}

pub fn arp_frame() -> Vec<u8> {
    ethernet(&[], 0x0806, &[0u8; 28])
}

/// An IEX-TP segment whose declared count matches `messages`.
pub fn segment(send_time_ns: u64, messages: &[Vec<u8>]) -> Vec<u8> {
    segment_declaring(messages.len() as u16, send_time_ns, messages)
}

pub fn segment_declaring(declared: u16, send_time_ns: u64, messages: &[Vec<u8>]) -> Vec<u8> {
    let mut block = Vec::new();
    for body in messages {
        block.extend_from_slice(&(body.len() as u16).to_le_bytes());
        block.extend_from_slice(body);
    }
    let mut out = vec![1, 0];
    out.extend_from_slice(&0x8004u16.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0x4242u32.to_le_bytes());
    out.extend_from_slice(&(block.len() as u16).to_le_bytes());
    out.extend_from_slice(&declared.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&1u64.to_le_bytes());
    out.extend_from_slice(&send_time_ns.to_le_bytes());
    out.extend_from_slice(&block);
    out
}

fn padded_symbol(symbol: &str) -> [u8; 8] {
    let mut out = [b' '; 8];
    out[..symbol.len()].copy_from_slice(symbol.as_bytes());
    out
}

pub fn trade(flags: u8, timestamp_ns: u64, symbol: &str, size: u32, price: u64, trade_id: u64) -> Vec<u8> {
    let mut out = vec![b'T', flags];
    out.extend_from_slice(&timestamp_ns.to_le_bytes());
    out.extend_from_slice(&padded_symbol(symbol));
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&price.to_le_bytes());
    out.extend_from_slice(&trade_id.to_le_bytes());
    out
}

pub fn price_level(side: u8, flags: u8, timestamp_ns: u64, symbol: &str, size: u32, price: u32) -> Vec<u8> {
    let mut out = vec![side, flags];
    out.extend_from_slice(&timestamp_ns.to_le_bytes());
    out.extend_from_slice(&padded_symbol(symbol));
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&price.to_le_bytes());
    out
}

pub fn system_event(code: u8, timestamp_ns: u64) -> Vec<u8> {
    let mut out = vec![b'S', code];
    out.extend_from_slice(&timestamp_ns.to_le_bytes());
    out
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

/// The single AAPL trade plus a closing system event used by most tests.
pub fn aapl_trade_capture() -> Vec<u8> {
    let payload = segment(
        SEND_TIME_NS,
        &[
            trade(0x40, MESSAGE_TIME_NS, "AAPL", 100, 1_500_000, 12_345),
            system_event(b'C', MESSAGE_TIME_NS + 1),
        ],
    );
    CaptureBuilder::new()
        .frame(CAPTURE_SEC, CAPTURE_USEC, &udp_frame(&payload))
        .build()
}
