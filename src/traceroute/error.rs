//! Error types for traceroute operations

use crate::packet::PacketError;
use thiserror::Error;

/// Errors that can occur during traceroute operations
#[derive(Debug, Error)]
pub enum TracerouteError {
    /// A raw socket could not be opened or configured
    ///
    /// Opening raw ICMP and raw IP sockets requires root or `CAP_NET_RAW`.
    #[error("Failed to create socket: {0}")]
    SocketError(#[source] std::io::Error),

    /// The target could not be resolved to an IPv4 address
    #[error("Failed to resolve host: {0}")]
    ResolutionError(String),

    /// A probe packet could not be encoded
    #[error("Invalid probe packet: {0}")]
    InvalidPacket(#[from] PacketError),

    /// A probe could not be written to the raw socket
    #[error("Failed to send probe: {0}")]
    ProbeSendError(#[source] std::io::Error),

    /// The server was shut down while the session was running
    #[error("server closed")]
    ServerClosed,

    /// The caller cancelled the session
    #[error("Operation cancelled")]
    Cancelled,

    /// A session task failed unexpectedly; the message carries the panic payload
    #[error("Internal error: {0}")]
    Internal(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl TracerouteError {
    /// Returns true if the error means the session was stopped before its timeout
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::ServerClosed | Self::Cancelled)
    }

    /// Returns true if the error is typically fixed by running with more privileges
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::SocketError(e) if e.kind() == std::io::ErrorKind::PermissionDenied)
    }
}
