//! Socket layer shared by every traceroute session
//!
//! The server reads ICMP frames from one [`FrameSource`] and writes every
//! session's probes through one [`ProbeSink`]. [`raw`] provides the raw
//! socket implementations; tests substitute in-memory ones.

pub mod pool;
pub mod raw;
pub mod utils;

use crate::packet::Ipv4Header;
use async_trait::async_trait;
use std::io;
use std::net::Ipv4Addr;

pub use pool::{BufferPool, FRAME_BUFFER_SIZE};
pub use raw::{RawIcmpSource, RawIpSink};

/// Inbound side: a stream of raw ICMPv4 frames
///
/// Frames may or may not start with the outer IPv4 header; the dispatcher
/// accepts both.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Read one frame into `buf`, returning its length and sender address.
    ///
    /// A zero length is not an error; the caller simply reads again.
    async fn recv_frame(&self, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)>;

    /// Release the underlying socket; pending and later reads fail
    fn close(&self) -> io::Result<()>;
}

/// Outbound side: writes a UDP datagram under a caller-built IPv4 header
///
/// Implementations must tolerate concurrent `send` calls from many sessions.
pub trait ProbeSink: Send + Sync {
    /// Write `datagram` (UDP header and payload) with the given IPv4 header
    fn send(&self, header: &Ipv4Header, datagram: &[u8]) -> io::Result<()>;

    /// Release the underlying socket; later sends fail
    fn close(&self) -> io::Result<()>;
}
