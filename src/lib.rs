//! mtrace - concurrent UDP traceroute
//!
//! This library traces many destinations at once over a single pair of raw
//! sockets. Probes are UDP datagrams with a hand-built IPv4 header; the
//! IPv4 identification field of each probe is its correlation key, echoed
//! back by routers inside ICMP Time Exceeded and Destination Unreachable
//! messages.
//!
//! Opening the raw sockets requires root or `CAP_NET_RAW`.

#[cfg(not(unix))]
compile_error!("mtrace requires a Unix platform with raw socket support");

pub mod packet;
pub mod socket;
pub mod traceroute;

#[cfg(test)]
mod tests;

// Re-export core types for library users
pub use socket::{FrameSource, ProbeSink};
pub use traceroute::{
    Config, ConfigBuilder, Hop, Node, Options, Server, TraceFuture, TraceResult, TracerouteError,
};
