//! Configuration types for traceroute operations
//!
//! [`Config`] is fixed once per [`crate::Server`]; [`Options`] is supplied
//! with every probe request and normalized when its session starts.

use crate::socket::utils::local_ipv4;
use crate::traceroute::TracerouteError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

/// Default capacity of the shared inbound frame queue
pub const DEFAULT_PACKET_QUEUE_SIZE: usize = 32;
/// Default time the dispatcher waits on a busy session before dropping a reply
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_millis(100);

/// Default base destination port (traditional traceroute port)
pub const DEFAULT_PORT: u16 = 33434;
/// Default first TTL
pub const DEFAULT_FIRST_HOP: u8 = 1;
/// Default last TTL
pub const DEFAULT_MAX_HOP: u8 = 64;
/// Default number of probes per TTL
pub const DEFAULT_ATTEMPTS: u8 = 3;
/// Default collection window after the last probe is sent
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
/// Default UDP payload size in bytes
pub const DEFAULT_PACKET_SIZE: usize = 16;
/// Largest UDP payload a single IPv4 datagram can carry
pub const MAX_PACKET_SIZE: usize = 65507;

/// Sink for operational errors (malformed frames, failed sends, dropped hand-offs)
pub type ErrorLog = Arc<dyn Fn(&str) + Send + Sync>;

/// Process-wide server configuration
#[derive(Clone, Default)]
pub struct Config {
    /// Error sink; errors go to `tracing::error!` when unset
    pub error_log: Option<ErrorLog>,
    /// Source address written into probe headers; auto-detected when unset
    pub local_src_ip: Option<Ipv4Addr>,
    /// Capacity of the inbound frame queue (0 means default)
    pub packet_queue_size: usize,
    /// Per-session hand-off timeout used by the dispatcher (zero means default)
    pub dispatch_timeout: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("error_log", &self.error_log.as_ref().map(|_| "<fn>"))
            .field("local_src_ip", &self.local_src_ip)
            .field("packet_queue_size", &self.packet_queue_size)
            .field("dispatch_timeout", &self.dispatch_timeout)
            .finish()
    }
}

impl Config {
    /// Create a new Config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Fill unset fields with their defaults.
    ///
    /// The local source address is detected from the routing table and
    /// falls back to `0.0.0.0`.
    pub fn normalize(&mut self) {
        if self.local_src_ip.is_none() {
            self.local_src_ip = Some(local_ipv4().unwrap_or(Ipv4Addr::UNSPECIFIED));
        }
        if self.packet_queue_size == 0 {
            self.packet_queue_size = DEFAULT_PACKET_QUEUE_SIZE;
        }
        if self.dispatch_timeout.is_zero() {
            self.dispatch_timeout = DEFAULT_DISPATCH_TIMEOUT;
        }
    }

    /// Source address for probe headers
    pub fn source_ip(&self) -> Ipv4Addr {
        self.local_src_ip.unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    pub(crate) fn log_error(&self, message: &str) {
        match &self.error_log {
            Some(sink) => sink(message),
            None => tracing::error!(target: "mtrace", "{}", message),
        }
    }
}

/// Builder for Config
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with every field unset
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Route operational errors to `sink`
    pub fn error_log(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.config.error_log = Some(Arc::new(sink));
        self
    }

    /// Set the probe source address
    pub fn local_src_ip(mut self, ip: Ipv4Addr) -> Self {
        self.config.local_src_ip = Some(ip);
        self
    }

    /// Set the inbound frame queue capacity
    pub fn packet_queue_size(mut self, size: usize) -> Self {
        self.config.packet_queue_size = size;
        self
    }

    /// Set the dispatcher hand-off timeout
    pub fn dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.config.dispatch_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-request probing options
///
/// Zero-valued fields are replaced by their defaults when the session
/// starts (see [`Options::normalized`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Base destination UDP port; probe `id` is sent to `port + id`
    pub port: u16,
    /// First TTL probed
    pub first_hop: u8,
    /// Last TTL probed
    pub max_hop: u8,
    /// Probes sent per TTL
    pub attempts: u8,
    /// Collection window, counted from the last send; replies slower than this are dropped
    pub timeout: Duration,
    /// UDP payload size in bytes
    pub packet_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            first_hop: DEFAULT_FIRST_HOP,
            max_hop: DEFAULT_MAX_HOP,
            attempts: DEFAULT_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
            packet_size: DEFAULT_PACKET_SIZE,
        }
    }
}

impl Options {
    /// Set the base destination port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the first TTL
    pub fn first_hop(mut self, ttl: u8) -> Self {
        self.first_hop = ttl;
        self
    }

    /// Set the last TTL
    pub fn max_hop(mut self, ttl: u8) -> Self {
        self.max_hop = ttl;
        self
    }

    /// Set the number of probes per TTL
    pub fn attempts(mut self, attempts: u8) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the collection timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the UDP payload size
    pub fn packet_size(mut self, size: usize) -> Self {
        self.packet_size = size;
        self
    }

    /// Replace zero fields with defaults
    pub fn normalized(mut self) -> Self {
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.first_hop == 0 {
            self.first_hop = DEFAULT_FIRST_HOP;
        }
        if self.max_hop == 0 {
            self.max_hop = DEFAULT_MAX_HOP;
        }
        if self.attempts == 0 {
            self.attempts = DEFAULT_ATTEMPTS;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.packet_size == 0 {
            self.packet_size = DEFAULT_PACKET_SIZE;
        }
        self
    }

    /// Reject options no session can run: an empty TTL range or a payload
    /// that does not fit in one datagram
    pub fn validate(&self) -> Result<(), TracerouteError> {
        if self.first_hop > self.max_hop {
            return Err(TracerouteError::ConfigError(format!(
                "first hop {} is beyond max hop {}",
                self.first_hop, self.max_hop
            )));
        }
        if self.packet_size > MAX_PACKET_SIZE {
            return Err(TracerouteError::ConfigError(format!(
                "packet size {} exceeds {}",
                self.packet_size, MAX_PACKET_SIZE
            )));
        }
        Ok(())
    }

    /// Number of probes a session sends with these options
    pub fn probe_count(&self) -> usize {
        if self.max_hop < self.first_hop {
            return 0;
        }
        usize::from(self.max_hop - self.first_hop + 1) * usize::from(self.attempts)
    }

    /// TTL carried by the probe with identification `id`.
    ///
    /// Identifications start at 1 and advance `attempts` times per TTL, so
    /// `((id - 1) / attempts) + first_hop`. Returns `None` for `id == 0` or
    /// when the TTL would not fit in a byte.
    pub fn ttl_for(&self, id: u16) -> Option<u8> {
        if id == 0 || self.attempts == 0 {
            return None;
        }
        let offset = (u32::from(id) - 1) / u32::from(self.attempts);
        u8::try_from(offset + u32::from(self.first_hop)).ok()
    }

    /// Destination UDP port of the probe with identification `id`
    pub fn port_for(&self, id: u16) -> u16 {
        self.port.wrapping_add(id)
    }
}
