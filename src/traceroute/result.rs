//! Result types for traceroute operations

use crate::traceroute::config::Options;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Accumulated observations of one traceroute run
///
/// Hops are kept in the order their TTL was first answered, which is not
/// necessarily increasing TTL. Call [`TraceResult::sort_hops`] before
/// displaying them.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// use mtrace::{Config, Options, Server};
/// use tokio_util::sync::CancellationToken;
///
/// let server = Server::new(Config::default())?;
/// let future = server
///     .start_probe(CancellationToken::new(), "example.com", Options::default())
///     .await?;
///
/// let mut result = future.result().await.clone();
/// result.sort_hops();
/// for hop in &result.hops {
///     for node in &hop.nodes {
///         println!("{} {} {:?}", hop.ttl, node.ip, node.rtts_ms());
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceResult {
    /// Destination address
    pub dst_ip: Ipv4Addr,
    /// True once any reply came from the destination itself
    pub reach: bool,
    /// Hops in first-answered order
    pub hops: Vec<Hop>,
    /// Options the run was made with, after normalization
    pub options: Options,
}

/// Hosts that answered probes sent with one TTL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    /// TTL of the probes
    pub ttl: u8,
    /// Distinct replying hosts, in first-seen order
    pub nodes: Vec<Node>,
}

/// One replying host at one hop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Address of the replying host
    pub ip: Ipv4Addr,
    /// Round-trip times in arrival order
    pub rtts: Vec<Duration>,
}

impl TraceResult {
    /// Empty result for `dst_ip`
    pub fn new(dst_ip: Ipv4Addr, options: Options) -> Self {
        Self {
            dst_ip,
            reach: false,
            hops: Vec::new(),
            options,
        }
    }

    /// Record one reply.
    ///
    /// Hops and nodes are unique per TTL and per address respectively; a
    /// repeated (ttl, from) pair appends to the existing node.
    pub fn aggregate(&mut self, ttl: u8, from: Ipv4Addr, rtt: Duration) {
        if from == self.dst_ip {
            self.reach = true;
        }

        if let Some(hop) = self.hops.iter_mut().find(|h| h.ttl == ttl) {
            match hop.nodes.iter_mut().find(|n| n.ip == from) {
                Some(node) => node.rtts.push(rtt),
                None => hop.nodes.push(Node::new(from, rtt)),
            }
            return;
        }

        let mut nodes = Vec::with_capacity(usize::from(self.options.attempts));
        nodes.push(Node::new(from, rtt));
        self.hops.push(Hop { ttl, nodes });
    }

    /// Sort hops by increasing TTL
    pub fn sort_hops(&mut self) {
        self.hops.sort_by_key(|h| h.ttl);
    }

    /// Hops ordered by increasing TTL, leaving `self` untouched
    pub fn sorted_hops(&self) -> Vec<&Hop> {
        let mut hops: Vec<&Hop> = self.hops.iter().collect();
        hops.sort_by_key(|h| h.ttl);
        hops
    }

    /// The hop recorded for `ttl`, if any reply arrived for it
    pub fn hop(&self, ttl: u8) -> Option<&Hop> {
        self.hops.iter().find(|h| h.ttl == ttl)
    }

    /// Number of TTLs that received at least one reply
    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }
}

impl Hop {
    /// The node for `ip` at this hop
    pub fn node(&self, ip: Ipv4Addr) -> Option<&Node> {
        self.nodes.iter().find(|n| n.ip == ip)
    }
}

impl Node {
    fn new(ip: Ipv4Addr, rtt: Duration) -> Self {
        Self {
            ip,
            rtts: vec![rtt],
        }
    }

    /// RTTs in milliseconds
    pub fn rtts_ms(&self) -> Vec<f64> {
        self.rtts.iter().map(|d| d.as_secs_f64() * 1000.0).collect()
    }
}
