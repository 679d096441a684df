//! Link, network and transport header stripping.
//!
//! Offsets are computed from the header fields of each frame, so VLAN tags
//! and IPv4 options are handled without any fixed skip length.

use log::{trace, warn};

use crate::capture::LINKTYPE_ETHERNET;
use crate::cursor::ByteCursor;
use crate::error::FrameError;

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const VLAN_TAG_LEN: usize = 4;
pub const IPV4_MIN_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_VLAN: u16 = 0x8100;
pub const ETHERTYPE_QINQ: u16 = 0x88a8;
pub const IPPROTO_UDP: u8 = 17;

pub const LINKTYPE_RAW: u32 = 101;
pub const LINKTYPE_IPV4: u32 = 228;

const IPV4_MORE_FRAGMENTS: u16 = 0x2000;
const IPV4_FRAGMENT_OFFSET: u16 = 0x1fff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    RawIp,
    /// Link framing this decoder cannot strip; every frame is discarded.
    Unsupported(u32),
}

/// Why a well-formed frame carries nothing to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    UnsupportedLinkType { link_type: u32 },
    NotIpv4 { ethertype: u16 },
    NotUdp { protocol: u8 },
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unwrapped<'a> {
    Payload(&'a [u8]),
    Discarded(Discard),
}

impl<'a> Unwrapped<'a> {
    pub fn payload(self) -> Option<&'a [u8]> {
        match self {
            Unwrapped::Payload(payload) => Some(payload),
            Unwrapped::Discarded(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameUnwrapper {
    link: LinkLayer,
}

impl FrameUnwrapper {
    pub fn new(link: LinkLayer) -> Self {
        Self { link }
    }

    pub fn for_link_type(link_type: u32) -> Self {
        let link = match link_type {
            LINKTYPE_ETHERNET => LinkLayer::Ethernet,
            LINKTYPE_RAW | LINKTYPE_IPV4 => LinkLayer::RawIp,
            other => {
                warn!("Unsupported link type {}, every frame will be discarded", other);
                LinkLayer::Unsupported(other)
            }
        };
        Self { link }
    }

    pub fn link(&self) -> LinkLayer {
        self.link
    }

    /// Returns the UDP payload of `frame`, or the reason it was skipped.
    pub fn unwrap<'a>(&self, frame: &'a [u8]) -> Result<Unwrapped<'a>, FrameError> {
        let mut cursor = ByteCursor::new(frame);

        match self.link {
            LinkLayer::Ethernet => {
                let ethertype = strip_ethernet(&mut cursor)?;
                if ethertype != ETHERTYPE_IPV4 {
                    return Ok(Unwrapped::Discarded(Discard::NotIpv4 { ethertype }));
                }
            }
            LinkLayer::RawIp => {}
            LinkLayer::Unsupported(link_type) => {
                return Ok(Unwrapped::Discarded(Discard::UnsupportedLinkType { link_type }));
            }
        }

        let datagram = match strip_ipv4(&mut cursor)? {
            Ok(datagram) => datagram,
            Err(discard) => return Ok(Unwrapped::Discarded(discard)),
        };
        strip_udp(datagram).map(Unwrapped::Payload)
    }
}

/// Consumes the Ethernet header and any 802.1Q/802.1ad tags, returning the
/// EtherType of the encapsulated protocol.
fn strip_ethernet(cursor: &mut ByteCursor<'_>) -> Result<u16, FrameError> {
    let truncated = FrameError::truncated;
    cursor.skip(ETHERNET_HEADER_LEN - 2).map_err(truncated("ethernet"))?;
    let mut ethertype = cursor.read_u16be().map_err(truncated("ethernet"))?;
    while ethertype == ETHERTYPE_VLAN || ethertype == ETHERTYPE_QINQ {
        cursor.skip(VLAN_TAG_LEN - 2).map_err(truncated("vlan"))?;
        ethertype = cursor.read_u16be().map_err(truncated("vlan"))?;
    }
    Ok(ethertype)
}

/// Consumes the IPv4 header and options. On success the returned slice is the
/// IP payload, bounded by the total-length field when that field is sane.
fn strip_ipv4<'a>(cursor: &mut ByteCursor<'a>) -> Result<Result<&'a [u8], Discard>, FrameError> {
    let truncated = FrameError::truncated;
    let start = cursor.rest();

    let version_ihl = cursor.read_u8().map_err(truncated("ipv4"))?;
    if version_ihl >> 4 != 4 {
        return Ok(Err(Discard::NotIpv4 { ethertype: ETHERTYPE_IPV4 }));
    }
    let header_len = usize::from(version_ihl & 0x0f) * 4;
    if header_len < IPV4_MIN_HEADER_LEN {
        return Err(FrameError::InvalidIpv4HeaderLength(header_len));
    }

    cursor.skip(1).map_err(truncated("ipv4"))?;
    let total_len = usize::from(cursor.read_u16be().map_err(truncated("ipv4"))?);
    cursor.skip(2).map_err(truncated("ipv4"))?;
    let flags_fragment = cursor.read_u16be().map_err(truncated("ipv4"))?;
    cursor.skip(1).map_err(truncated("ipv4"))?;
    let protocol = cursor.read_u8().map_err(truncated("ipv4"))?;
    cursor.skip(header_len - 10).map_err(truncated("ipv4"))?;

    if protocol != IPPROTO_UDP {
        return Ok(Err(Discard::NotUdp { protocol }));
    }
    if flags_fragment & (IPV4_MORE_FRAGMENTS | IPV4_FRAGMENT_OFFSET) != 0 {
        trace!("Skipping IPv4 fragment (flags/offset 0x{:04x})", flags_fragment);
        return Ok(Err(Discard::Fragment));
    }

    // Ethernet pads short frames; trust the IP length when it fits.
    let payload = cursor.rest();
    let bounded = if total_len >= header_len && total_len <= start.len() {
        &payload[..total_len - header_len]
    } else {
        payload
    };
    Ok(Ok(bounded))
}

fn strip_udp(datagram: &[u8]) -> Result<&[u8], FrameError> {
    let mut cursor = ByteCursor::new(datagram);
    let truncated = FrameError::truncated;
    let src_port = cursor.read_u16be().map_err(truncated("udp"))?;
    let dst_port = cursor.read_u16be().map_err(truncated("udp"))?;
    let udp_len = usize::from(cursor.read_u16be().map_err(truncated("udp"))?);
    cursor.skip(2).map_err(truncated("udp"))?;

    let payload = cursor.rest();
    trace!("UDP {} -> {}, length {}, {} payload bytes", src_port, dst_port, udp_len, payload.len());
    if udp_len >= UDP_HEADER_LEN && udp_len - UDP_HEADER_LEN <= payload.len() {
        Ok(&payload[..udp_len - UDP_HEADER_LEN])
    } else {
        Ok(payload)
    }
}
