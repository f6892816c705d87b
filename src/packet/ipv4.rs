//! IPv4 header for probes written through a raw `IP_HDRINCL` socket

use super::{to_ipv4, PacketError};
use pnet::packet::ip::IpNextHeaderProtocol;
use pnet::packet::ipv4::{self, Ipv4Flags, MutableIpv4Packet};
use std::net::{IpAddr, Ipv4Addr};

/// IP version nibble for IPv4
pub const IPV4_VERSION: u8 = 4;
/// IPv4 header length without options, in bytes
pub const IPV4_HEADER_LEN: usize = 20;
/// IANA protocol number for ICMP
pub const PROTOCOL_ICMP: u8 = 1;
/// IANA protocol number for UDP
pub const PROTOCOL_UDP: u8 = 17;

/// Fields of an IPv4 header that a probe controls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Identification field, echoed back inside ICMP error payloads
    pub identification: u16,
    /// Time-to-live
    pub ttl: u8,
    /// Payload protocol number
    pub protocol: u8,
    /// Set the Don't Fragment flag
    pub dont_fragment: bool,
    /// Source address
    pub src: IpAddr,
    /// Destination address
    pub dst: IpAddr,
}

impl Default for Ipv4Header {
    fn default() -> Self {
        Self {
            identification: 0,
            ttl: 64,
            protocol: PROTOCOL_UDP,
            dont_fragment: true,
            src: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

impl Ipv4Header {
    /// Header for a UDP probe with the given identification and TTL
    pub fn udp_probe(src: Ipv4Addr, dst: Ipv4Addr, identification: u16, ttl: u8) -> Self {
        Self {
            identification,
            ttl,
            protocol: PROTOCOL_UDP,
            dont_fragment: true,
            src: IpAddr::V4(src),
            dst: IpAddr::V4(dst),
        }
    }

    /// Encode this header followed by `payload` into a complete IPv4 packet.
    ///
    /// Total length and header checksum are filled in here.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, PacketError> {
        let src = to_ipv4(self.src).ok_or(PacketError::InvalidSource(self.src))?;
        let dst = to_ipv4(self.dst).ok_or(PacketError::InvalidDestination(self.dst))?;

        let total_len = IPV4_HEADER_LEN + payload.len();
        let total_len16 =
            u16::try_from(total_len).map_err(|_| PacketError::PayloadTooLarge(payload.len()))?;

        let mut buffer = vec![0u8; total_len];
        let mut packet =
            MutableIpv4Packet::new(&mut buffer).ok_or(PacketError::BufferTooSmall("IPv4"))?;

        packet.set_version(IPV4_VERSION);
        packet.set_header_length((IPV4_HEADER_LEN / 4) as u8);
        packet.set_total_length(total_len16);
        packet.set_identification(self.identification);
        if self.dont_fragment {
            packet.set_flags(Ipv4Flags::DontFragment);
        }
        packet.set_ttl(self.ttl);
        packet.set_next_level_protocol(IpNextHeaderProtocol::new(self.protocol));
        packet.set_source(src);
        packet.set_destination(dst);
        packet.set_payload(payload);

        let checksum = ipv4::checksum(&packet.to_immutable());
        packet.set_checksum(checksum);

        Ok(buffer)
    }
}
