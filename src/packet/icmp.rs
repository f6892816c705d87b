//! Decoding of ICMPv4 error messages that quote a probe

use super::{IPV4_HEADER_LEN, IPV4_VERSION};
use pnet::packet::icmp::{IcmpPacket, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Fixed part of every ICMP message: type, code, checksum and four bytes
/// of type-specific data
pub const ICMP_HEADER_LEN: usize = 8;

/// Why a frame could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The frame ended before the named header did
    #[error("truncated {0}")]
    Truncated(&'static str),

    /// The quoted datagram is not IPv4
    #[error("quoted datagram has ip version {0}")]
    BadVersion(u8),
}

/// Correlation fields of the probe quoted by an ICMP error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotedProbe {
    /// Identification field of the original IPv4 header
    pub id: u16,
    /// Destination of the original datagram
    pub dst: Ipv4Addr,
}

/// Decode one frame read from a raw ICMP socket.
///
/// The frame may start with the outer IPv4 header or directly with the
/// ICMP message. Only Time Exceeded and Destination Unreachable carry a
/// quoted probe; every other message type yields `Ok(None)`.
pub fn parse_reply(frame: &[u8]) -> Result<Option<QuotedProbe>, FrameError> {
    let icmp_bytes = strip_ipv4_header(frame)?;
    let icmp = IcmpPacket::new(icmp_bytes).ok_or(FrameError::Truncated("icmp header"))?;
    match icmp.get_icmp_type() {
        IcmpTypes::TimeExceeded | IcmpTypes::DestinationUnreachable => {}
        _ => return Ok(None),
    }

    let quoted = icmp_bytes.get(ICMP_HEADER_LEN..).unwrap_or_default();
    if quoted.len() < IPV4_HEADER_LEN {
        return Err(FrameError::Truncated("quoted ipv4 header"));
    }
    let version = quoted[0] >> 4;
    if version != IPV4_VERSION {
        return Err(FrameError::BadVersion(version));
    }

    let inner = Ipv4Packet::new(quoted).ok_or(FrameError::Truncated("quoted ipv4 header"))?;
    Ok(Some(QuotedProbe {
        id: inner.get_identification(),
        dst: inner.get_destination(),
    }))
}

/// Skip the outer IPv4 header when the frame carries one
fn strip_ipv4_header(frame: &[u8]) -> Result<&[u8], FrameError> {
    if frame.first().map(|b| b >> 4) != Some(IPV4_VERSION) {
        return Ok(frame);
    }
    let outer = Ipv4Packet::new(frame).ok_or(FrameError::Truncated("ipv4 header"))?;
    let header_len = usize::from(outer.get_header_length()) * 4;
    if header_len < IPV4_HEADER_LEN {
        return Err(FrameError::Truncated("ipv4 header"));
    }
    frame
        .get(header_len..)
        .ok_or(FrameError::Truncated("ipv4 header"))
}
