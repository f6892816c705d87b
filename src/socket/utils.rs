//! Utility functions for socket operations

use pnet::datalink::{self, NetworkInterface};
use std::net::{IpAddr, Ipv4Addr};

/// Check if running as root
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

/// First non-loopback IPv4 address assigned to any network interface
pub fn local_ipv4() -> Option<Ipv4Addr> {
    first_ipv4(&datalink::interfaces())
}

/// Pick the first usable IPv4 address in interface order
fn first_ipv4(interfaces: &[NetworkInterface]) -> Option<Ipv4Addr> {
    interfaces
        .iter()
        .filter(|iface| !iface.is_loopback())
        .flat_map(|iface| iface.ips.iter())
        .find_map(|net| match net.ip() {
            IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
            _ => None,
        })
}
