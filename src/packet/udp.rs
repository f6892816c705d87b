//! UDP datagram encoding with RFC 768 checksum

use super::{to_ipv4, Ipv4Header, PacketError};
use pnet::packet::udp::MutableUdpPacket;
use std::net::Ipv4Addr;

/// UDP header length in bytes
pub const UDP_HEADER_LEN: usize = 8;

/// IPv4 pseudo-header length in bytes
const PSEUDO_HEADER_LEN: usize = 12;

/// A UDP datagram ready to be encoded against an IPv4 header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpDatagram {
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
}

impl UdpDatagram {
    /// Create a datagram description for the given port pair
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Self { src_port, dst_port }
    }

    /// Encode the 8-byte UDP header followed by `payload`.
    ///
    /// The source address, destination address and protocol of `header`
    /// feed the pseudo-header the checksum is computed over.
    pub fn encode(&self, header: &Ipv4Header, payload: &[u8]) -> Result<Vec<u8>, PacketError> {
        let src = to_ipv4(header.src).ok_or(PacketError::InvalidSource(header.src))?;
        let dst = to_ipv4(header.dst).ok_or(PacketError::InvalidDestination(header.dst))?;

        let udp_len = UDP_HEADER_LEN + payload.len();
        let length =
            u16::try_from(udp_len).map_err(|_| PacketError::PayloadTooLarge(payload.len()))?;

        let mut buffer = vec![0u8; udp_len];
        let mut udp =
            MutableUdpPacket::new(&mut buffer).ok_or(PacketError::BufferTooSmall("UDP"))?;
        udp.set_source(self.src_port);
        udp.set_destination(self.dst_port);
        udp.set_length(length);
        udp.set_checksum(0);
        udp.set_payload(payload);

        let mut summed = Vec::with_capacity(PSEUDO_HEADER_LEN + udp_len);
        summed.extend_from_slice(&pseudo_header(src, dst, header.protocol, length));
        summed.extend_from_slice(&buffer);
        let checksum = udp_checksum(&summed);

        buffer[6..8].copy_from_slice(&checksum.to_be_bytes());
        Ok(buffer)
    }
}

/// Build the 12-byte IPv4 pseudo-header: src, dst, zero, protocol, length.
pub fn pseudo_header(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, udp_len: u16) -> [u8; 12] {
    let mut ph = [0u8; PSEUDO_HEADER_LEN];
    ph[0..4].copy_from_slice(&src.octets());
    ph[4..8].copy_from_slice(&dst.octets());
    ph[8] = 0;
    ph[9] = protocol;
    ph[10..12].copy_from_slice(&udp_len.to_be_bytes());
    ph
}

/// One's complement of the one's complement sum of 16-bit big-endian words.
///
/// A trailing odd byte is treated as the high byte of a zero-padded word.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for word in words.by_ref() {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum > 0xffff {
        sum = (sum >> 16) + (sum & 0xffff);
    }
    !(sum as u16)
}

/// Internet checksum as carried in a UDP header.
///
/// A computed zero is transmitted as `0xFFFF`; an all-zero field means the
/// sender generated no checksum (RFC 768).
pub fn udp_checksum(data: &[u8]) -> u16 {
    match internet_checksum(data) {
        0 => 0xffff,
        csum => csum,
    }
}
