//! Target name resolution

use crate::traceroute::TracerouteError;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use std::net::{IpAddr, Ipv4Addr};

/// Resolves probe targets to IPv4 addresses
pub struct Resolver {
    inner: TokioResolver,
}

impl Resolver {
    /// Resolver backed by Cloudflare's public DNS
    pub fn new() -> Self {
        Self {
            inner: TokioResolver::builder_with_config(
                ResolverConfig::cloudflare(),
                TokioConnectionProvider::default(),
            )
            .build(),
        }
    }

    /// Resolve `host` to its first IPv4 address.
    ///
    /// IPv4 literals are returned as is; IPv6 literals and names with only
    /// AAAA records are rejected.
    pub async fn resolve_ipv4(&self, host: &str) -> Result<Ipv4Addr, TracerouteError> {
        if let Some(literal) = parse_literal(host)? {
            return Ok(literal);
        }

        let lookup = self
            .inner
            .ipv4_lookup(host)
            .await
            .map_err(|e| TracerouteError::ResolutionError(format!("{}: {}", host, e)))?;
        let Some(record) = lookup.iter().next() else {
            let reason = format!("{}: no IPv4 address", host);
            return Err(TracerouteError::ResolutionError(reason));
        };
        Ok(record.0)
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_literal(host: &str) -> Result<Option<Ipv4Addr>, TracerouteError> {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => Ok(Some(ip)),
        Ok(IpAddr::V6(ip)) => Err(TracerouteError::ResolutionError(format!(
            "{}: IPv6 targets are not supported",
            ip
        ))),
        Err(_) if host.is_empty() => Err(TracerouteError::ResolutionError(
            "empty host name".to_string(),
        )),
        Err(_) => Ok(None),
    }
}
