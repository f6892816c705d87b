//! Concurrent UDP traceroute engine
//!
//! [`Server`] owns the raw sockets and the background reader and
//! dispatcher; each [`Server::start_probe`] call runs or joins one session
//! and hands back a [`TraceFuture`] for its [`TraceResult`].

pub mod config;
pub mod error;
pub mod future;
pub mod resolve;
pub mod result;
pub mod server;
mod session;

pub use config::{Config, ConfigBuilder, ErrorLog, Options};
pub use error::TracerouteError;
pub use future::TraceFuture;
pub use resolve::Resolver;
pub use result::{Hop, Node, TraceResult};
pub use server::Server;
