//! Shared traceroute server
//!
//! One [`Server`] owns one inbound [`FrameSource`] and one outbound
//! [`ProbeSink`] and runs any number of concurrent sessions over them. Two
//! background tasks serve every session: the reader pulls frames off the
//! source into pooled buffers, and the dispatcher decodes them and routes
//! each reply to the session probing the quoted destination.

use crate::packet::parse_reply;
use crate::socket::{BufferPool, FrameSource, ProbeSink, RawIcmpSource, RawIpSink};
use crate::traceroute::resolve::Resolver;
use crate::traceroute::session::{self, HandoffError, PacketRecord, SessionHandle};
use crate::traceroute::{Config, Options, TraceFuture, TracerouteError};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A frame waiting for the dispatcher; `buf` goes back to the pool once decoded
struct Frame {
    buf: Vec<u8>,
    len: usize,
    from: Ipv4Addr,
    received_at: Instant,
}

/// State shared by the server, its background tasks and its sessions
pub(crate) struct Shared {
    pub(crate) config: Config,
    source: Arc<dyn FrameSource>,
    pub(crate) sink: Arc<dyn ProbeSink>,
    /// Cancelled once on shutdown
    pub(crate) closed: CancellationToken,
    sessions: Mutex<HashMap<Ipv4Addr, Arc<SessionHandle>>>,
    shutdown_started: AtomicBool,
    pool: BufferPool,
}

impl Shared {
    fn lookup(&self, dst: Ipv4Addr) -> Option<Arc<SessionHandle>> {
        self.sessions
            .lock()
            .expect("mutex poisoned")
            .get(&dst)
            .cloned()
    }

    /// Remove `handle` from the registry unless another session replaced it
    pub(crate) fn deregister(&self, handle: &Arc<SessionHandle>) {
        let mut sessions = self.sessions.lock().expect("mutex poisoned");
        if let Some(current) = sessions.get(&handle.dst()) {
            if Arc::ptr_eq(current, handle) {
                sessions.remove(&handle.dst());
            }
        }
    }

    fn shutdown(&self) -> Result<(), TracerouteError> {
        if self.shutdown_started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!("server shutting down");
        self.closed.cancel();
        // Close both even when the first fails
        let sink = self.sink.close();
        let source = self.source.close();
        sink.and(source).map_err(TracerouteError::SocketError)
    }
}

/// Concurrent UDP traceroute server
///
/// Probes to different destinations run in parallel over the same pair of
/// raw sockets. Probes to a destination that is already being traced share
/// the running session.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> Result<(), mtrace::TracerouteError> {
/// use mtrace::{Config, Options, Server};
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// let server = Server::new(Config::default())?;
/// let options = Options::default().max_hop(30).timeout(Duration::from_millis(500));
///
/// let a = server.start_probe(CancellationToken::new(), "1.1.1.1", options).await?;
/// let b = server.start_probe(CancellationToken::new(), "8.8.8.8", options).await?;
///
/// println!("{:?}", a.result().await);
/// println!("{:?}", b.result().await);
/// server.shutdown()?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    shared: Arc<Shared>,
    resolver: Resolver,
}

impl Server {
    /// Open the raw sockets and start the background tasks.
    ///
    /// Requires root or `CAP_NET_RAW`, and must be called from within a
    /// Tokio runtime.
    pub fn new(mut config: Config) -> Result<Self, TracerouteError> {
        config.normalize();
        let source = RawIcmpSource::open().map_err(TracerouteError::SocketError)?;
        // On failure the source is dropped here, closing it
        let sink = RawIpSink::open(config.source_ip()).map_err(TracerouteError::SocketError)?;
        Ok(Self::with_transport(
            config,
            Arc::new(source),
            Arc::new(sink),
        ))
    }

    /// Start a server over an existing transport.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_transport(
        mut config: Config,
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn ProbeSink>,
    ) -> Self {
        config.normalize();
        let (frame_tx, frame_rx) = mpsc::channel(config.packet_queue_size);

        let shared = Arc::new(Shared {
            config,
            source,
            sink,
            closed: CancellationToken::new(),
            sessions: Mutex::new(HashMap::new()),
            shutdown_started: AtomicBool::new(false),
            pool: BufferPool::default(),
        });

        tokio::spawn(read_loop(Arc::clone(&shared), frame_tx));
        tokio::spawn(dispatch_loop(Arc::clone(&shared), frame_rx));

        tracing::debug!(src = %shared.config.source_ip(), "server started");
        Self {
            shared,
            resolver: Resolver::new(),
        }
    }

    /// The normalized configuration
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Start tracing `target`, or join the session already tracing it.
    ///
    /// Returns as soon as the session is registered; await the returned
    /// future for the outcome. Cancelling `ctx` stops this session only.
    /// When a session for the same destination is already running, its
    /// future is returned and `options` is ignored.
    ///
    /// Fails with [`TracerouteError::ResolutionError`] when `target` has no
    /// IPv4 address, [`TracerouteError::ConfigError`] when the TTL range is
    /// empty or the payload exceeds
    /// [`MAX_PACKET_SIZE`](crate::traceroute::config::MAX_PACKET_SIZE), and
    /// [`TracerouteError::ServerClosed`] after shutdown.
    pub async fn start_probe(
        &self,
        ctx: CancellationToken,
        target: &str,
        options: Options,
    ) -> Result<TraceFuture, TracerouteError> {
        if self.shared.closed.is_cancelled() {
            return Err(TracerouteError::ServerClosed);
        }
        let dst = self.resolver.resolve_ipv4(target).await?;
        self.start_probe_ip(ctx, dst, options)
    }

    /// Like [`Server::start_probe`] for an already resolved destination
    pub fn start_probe_ip(
        &self,
        ctx: CancellationToken,
        dst: Ipv4Addr,
        options: Options,
    ) -> Result<TraceFuture, TracerouteError> {
        if self.shared.closed.is_cancelled() {
            return Err(TracerouteError::ServerClosed);
        }
        let options = options.normalized();
        options.validate()?;

        let mut sessions = self.shared.sessions.lock().expect("mutex poisoned");
        if let Some(existing) = sessions.get(&dst) {
            tracing::debug!(%dst, "joining running session");
            return Ok(existing.future().clone());
        }
        let handle = session::spawn(&self.shared, ctx, dst, options);
        let future = handle.future().clone();
        sessions.insert(dst, handle);
        Ok(future)
    }

    /// Number of sessions currently registered
    pub fn session_count(&self) -> usize {
        self.shared.sessions.lock().expect("mutex poisoned").len()
    }

    /// Whether [`Server::shutdown`] has been called or the reader failed
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Stop every session and close both sockets.
    ///
    /// Running sessions complete with [`TracerouteError::ServerClosed`].
    /// Only the first call has effect; it closes the write socket and then
    /// the read socket, and returns the first error either close reported.
    /// Later and concurrent calls return `Ok`.
    pub fn shutdown(&self) -> Result<(), TracerouteError> {
        self.shared.shutdown()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Err(e) = self.shared.shutdown() {
            tracing::debug!("shutdown on drop: {}", e);
        }
    }
}

async fn read_loop(shared: Arc<Shared>, frames: mpsc::Sender<Frame>) {
    loop {
        let mut buf = shared.pool.get();
        let read = tokio::select! {
            biased;
            _ = shared.closed.cancelled() => return,
            read = shared.source.recv_frame(&mut buf) => read,
        };

        let (len, from) = match read {
            Ok((0, _)) => {
                shared.pool.put(buf);
                continue;
            }
            Ok(read) => read,
            Err(e) => {
                shared.config.log_error(&format!("read icmp socket: {}", e));
                if let Err(e) = shared.shutdown() {
                    shared
                        .config
                        .log_error(&format!("shutdown after read error: {}", e));
                }
                return;
            }
        };

        let frame = Frame {
            buf,
            len,
            from,
            received_at: Instant::now(),
        };
        tokio::select! {
            biased;
            _ = shared.closed.cancelled() => return,
            sent = frames.send(frame) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

async fn dispatch_loop(shared: Arc<Shared>, mut frames: mpsc::Receiver<Frame>) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shared.closed.cancelled() => return,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
        };

        let decoded = parse_reply(&frame.buf[..frame.len]);
        let Frame {
            buf,
            from,
            received_at,
            ..
        } = frame;
        shared.pool.put(buf);

        let probe = match decoded {
            Ok(Some(probe)) => probe,
            Ok(None) => continue,
            Err(e) => {
                shared
                    .config
                    .log_error(&format!("drop frame from {}: {}", from, e));
                continue;
            }
        };

        let Some(handle) = shared.lookup(probe.dst) else {
            tracing::trace!(dst = %probe.dst, id = probe.id, %from, "no session for reply");
            continue;
        };

        let record = PacketRecord {
            id: probe.id,
            from,
            received_at,
        };
        match handle.accept_packet(record).await {
            Ok(()) => {}
            Err(HandoffError::Timeout) => shared.config.log_error(&format!(
                "session {} busy, dropped reply {} from {}",
                probe.dst, probe.id, from
            )),
            Err(HandoffError::Finished) => {
                tracing::trace!(dst = %probe.dst, id = probe.id, "session already finished");
            }
        }
    }
}
