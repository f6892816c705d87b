//! Wire-level packet handling for UDP probes
//!
//! The probe path builds a UDP datagram whose checksum covers the IPv4
//! pseudo-header, then wraps it in a hand-built IPv4 header for the raw
//! write socket. The reply path decodes the ICMP errors routers send back.

pub mod icmp;
pub mod ipv4;
pub mod udp;

use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

pub use icmp::{parse_reply, FrameError, QuotedProbe, ICMP_HEADER_LEN};
pub use ipv4::{Ipv4Header, IPV4_HEADER_LEN, IPV4_VERSION, PROTOCOL_ICMP, PROTOCOL_UDP};
pub use udp::{internet_checksum, udp_checksum, UdpDatagram, UDP_HEADER_LEN};

/// Errors raised while encoding probe packets
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// The source address cannot be reduced to four bytes
    #[error("invalid src ip: {0}")]
    InvalidSource(IpAddr),

    /// The destination address cannot be reduced to four bytes
    #[error("invalid dst ip: {0}")]
    InvalidDestination(IpAddr),

    /// The payload does not fit the 16-bit length field
    #[error("payload of {0} bytes does not fit in a single datagram")]
    PayloadTooLarge(usize),

    /// pnet refused the buffer handed to it
    #[error("buffer too small for {0} header")]
    BufferTooSmall(&'static str),
}

/// Reduce an address to its IPv4 form.
///
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are accepted; any other
/// IPv6 address yields `None`.
pub fn to_ipv4(addr: IpAddr) -> Option<Ipv4Addr> {
    match addr {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}
