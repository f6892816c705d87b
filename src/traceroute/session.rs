//! Per-destination probing session
//!
//! A session owns two tasks: a sender that writes one probe per
//! (TTL, attempt) through the shared [`ProbeSink`](crate::socket::ProbeSink),
//! and a run loop that correlates replies handed over by the server's
//! dispatcher and aggregates them into a [`TraceResult`].

use crate::packet::{Ipv4Header, UdpDatagram};
use crate::traceroute::server::Shared;
use crate::traceroute::{Options, TraceFuture, TraceResult, TracerouteError};
use futures::FutureExt;
use rand::Rng;
use std::any::Any;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Capacity of a session's private reply queue
const SESSION_QUEUE_SIZE: usize = 16;

/// Source ports are drawn from this range, one per session
const SOURCE_PORT_RANGE: std::ops::Range<u16> = 30000..65535;

/// A reply correlated to a destination, detached from the read buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PacketRecord {
    /// Identification field of the quoted probe header
    pub id: u16,
    /// Host that sent the ICMP message
    pub from: Ipv4Addr,
    /// When the frame was read off the socket
    pub received_at: Instant,
}

/// Sender to run-loop notifications
#[derive(Debug)]
enum ProbeEvent {
    /// Probe `id` is about to be written
    Sent { id: u16, sent_at: Instant },
    /// The write for probe `id` failed
    Failed(u16),
}

/// Why a hand-off to a session did not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandoffError {
    /// The session did not drain its queue within the dispatch timeout
    Timeout,
    /// The session has already finished
    Finished,
}

/// Registry entry for a running session
pub(crate) struct SessionHandle {
    dst: Ipv4Addr,
    packet_tx: mpsc::Sender<PacketRecord>,
    future: TraceFuture,
    dispatch_timeout: Duration,
}

impl SessionHandle {
    /// Destination this session probes
    pub(crate) fn dst(&self) -> Ipv4Addr {
        self.dst
    }

    /// Completion handle shared with every caller of this session
    pub(crate) fn future(&self) -> &TraceFuture {
        &self.future
    }

    /// Queue a reply for the run loop, waiting at most the dispatch timeout
    pub(crate) async fn accept_packet(&self, record: PacketRecord) -> Result<(), HandoffError> {
        match self
            .packet_tx
            .send_timeout(record, self.dispatch_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(HandoffError::Timeout),
            Err(SendTimeoutError::Closed(_)) => Err(HandoffError::Finished),
        }
    }
}

/// Create a session for `dst` and spawn its sender and run loop.
///
/// Called with the registry lock held; nothing here blocks. `options` must
/// already be normalized.
pub(crate) fn spawn(
    shared: &Arc<Shared>,
    ctx: CancellationToken,
    dst: Ipv4Addr,
    options: Options,
) -> Arc<SessionHandle> {
    let (packet_tx, packet_rx) = mpsc::channel(SESSION_QUEUE_SIZE);
    let (probe_tx, probe_rx) = mpsc::channel(SESSION_QUEUE_SIZE);

    let handle = Arc::new(SessionHandle {
        dst,
        packet_tx,
        future: TraceFuture::new(),
        dispatch_timeout: shared.config.dispatch_timeout,
    });

    let sender = ProbeSender {
        shared: Arc::clone(shared),
        ctx: ctx.clone(),
        future: handle.future.clone(),
        src: shared.config.source_ip(),
        dst,
        options,
    };
    tokio::spawn(sender.run(probe_tx));

    let session = Session {
        shared: Arc::clone(shared),
        ctx,
        options,
        packet_rx,
        probe_rx,
    };
    tokio::spawn(session.run(Arc::clone(&handle)));

    tracing::debug!(%dst, probes = options.probe_count(), "session started");
    handle
}

struct ProbeSender {
    shared: Arc<Shared>,
    ctx: CancellationToken,
    future: TraceFuture,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    options: Options,
}

impl ProbeSender {
    fn stopped(&self) -> bool {
        self.future.is_done() || self.ctx.is_cancelled() || self.shared.closed.is_cancelled()
    }

    /// Send every probe, then drop `events` to start the drain timer
    async fn run(self, events: mpsc::Sender<ProbeEvent>) {
        let src_port = rand::rng().random_range(SOURCE_PORT_RANGE);
        let payload = vec![0u8; self.options.packet_size];
        let mut id: u16 = 0;

        for ttl in self.options.first_hop..=self.options.max_hop {
            for _ in 0..self.options.attempts {
                if self.stopped() {
                    return;
                }
                id += 1;

                let header = Ipv4Header::udp_probe(self.src, self.dst, id, ttl);
                let datagram = UdpDatagram::new(src_port, self.options.port_for(id));
                let bytes = match datagram.encode(&header, &payload) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        self.shared
                            .config
                            .log_error(&format!("build probe {} to {}: {}", id, self.dst, e));
                        continue;
                    }
                };

                // Announce first so a fast reply always finds its send time
                let sent_at = Instant::now();
                if events.send(ProbeEvent::Sent { id, sent_at }).await.is_err() {
                    return;
                }
                if let Err(e) = self.shared.sink.send(&header, &bytes) {
                    self.shared
                        .config
                        .log_error(&format!("send probe {} to {}: {}", id, self.dst, e));
                    if events.send(ProbeEvent::Failed(id)).await.is_err() {
                        return;
                    }
                    continue;
                }
                tracing::trace!(dst = %self.dst, id, ttl, "probe sent");
            }
        }
        tracing::debug!(dst = %self.dst, sent = id, "all probes sent");
    }
}

struct Session {
    shared: Arc<Shared>,
    ctx: CancellationToken,
    options: Options,
    packet_rx: mpsc::Receiver<PacketRecord>,
    probe_rx: mpsc::Receiver<ProbeEvent>,
}

impl Session {
    async fn run(mut self, handle: Arc<SessionHandle>) {
        let mut result = TraceResult::new(handle.dst, self.options);

        let outcome = AssertUnwindSafe(self.collect(&mut result))
            .catch_unwind()
            .await;
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(panic) => Some(TracerouteError::Internal(panic_message(panic))),
        };

        tracing::debug!(
            dst = %handle.dst,
            reach = result.reach,
            hops = result.hop_count(),
            error = ?error,
            "session finished"
        );

        // Deregister first so a caller woken by completion can start afresh
        self.shared.deregister(&handle);
        handle.future.complete(result, error);
    }

    /// Correlate replies until the drain timer fires or the session is stopped
    async fn collect(&mut self, result: &mut TraceResult) -> Result<(), TracerouteError> {
        let mut sent: HashMap<u16, Instant> = HashMap::with_capacity(self.options.probe_count());
        let mut sending = true;
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                _ = self.ctx.cancelled() => return Err(TracerouteError::Cancelled),
                _ = self.shared.closed.cancelled() => return Err(TracerouteError::ServerClosed),
                _ = wait_until(deadline) => return Ok(()),

                event = self.probe_rx.recv(), if sending => match event {
                    Some(ProbeEvent::Sent { id, sent_at }) => {
                        sent.insert(id, sent_at);
                    }
                    Some(ProbeEvent::Failed(id)) => {
                        sent.remove(&id);
                    }
                    None => {
                        sending = false;
                        deadline = Some(Instant::now() + self.options.timeout);
                    }
                },

                record = self.packet_rx.recv() => match record {
                    Some(record) => self.record_reply(&sent, record, result),
                    None => return Ok(()),
                },
            }
        }
    }

    fn record_reply(
        &self,
        sent: &HashMap<u16, Instant>,
        record: PacketRecord,
        result: &mut TraceResult,
    ) {
        let Some(sent_at) = sent.get(&record.id) else {
            tracing::trace!(id = record.id, from = %record.from, "reply for unknown probe");
            return;
        };
        let rtt = record.received_at.saturating_duration_since(*sent_at);
        if rtt > self.options.timeout {
            tracing::trace!(id = record.id, ?rtt, "late reply dropped");
            return;
        }
        let Some(ttl) = self.options.ttl_for(record.id) else {
            return;
        };
        result.aggregate(ttl, record.from, rtt);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "session task panicked".to_string()
    }
}
