//! End-to-end tests over a simulated network
//!
//! [`SimNetwork`] stands in for both raw sockets: every probe written to
//! its sink is answered through its source the way routers would answer,
//! so whole sessions run without privileges.

use crate::packet::{Ipv4Header, ICMP_HEADER_LEN, IPV4_HEADER_LEN, PROTOCOL_ICMP, UDP_HEADER_LEN};
use crate::socket::{FrameSource, ProbeSink};
use crate::traceroute::{Config, Options, Server, TraceFuture, TracerouteError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const ROUTER_1: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const ROUTER_2: Ipv4Addr = Ipv4Addr::new(172, 16, 0, 1);
const TARGET: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 10);
const OTHER_TARGET: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 20);
/// No route is configured for this address, so its probes go unanswered
const SILENT_TARGET: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 30);

const WAIT: Duration = Duration::from_secs(5);

type Delivery = io::Result<(Vec<u8>, Ipv4Addr)>;

/// A probe as seen by the simulated network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SentProbe {
    dst: Ipv4Addr,
    id: u16,
    ttl: u8,
}

struct SimNetwork {
    routes: HashMap<Ipv4Addr, Vec<Ipv4Addr>>,
    deliveries: mpsc::UnboundedSender<Delivery>,
    sent: Mutex<Vec<SentProbe>>,
    closes: AtomicUsize,
    source_closes: Arc<AtomicUsize>,
    drop_ttl: Option<u8>,
    fail_ttl: Option<u8>,
}

impl SimNetwork {
    fn new(routes: &[(Ipv4Addr, &[Ipv4Addr])]) -> (Arc<Self>, SimSource) {
        Self::build(routes, None, None)
    }

    fn build(
        routes: &[(Ipv4Addr, &[Ipv4Addr])],
        drop_ttl: Option<u8>,
        fail_ttl: Option<u8>,
    ) -> (Arc<Self>, SimSource) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source_closes = Arc::new(AtomicUsize::new(0));
        let network = Arc::new(Self {
            routes: routes.iter().map(|(dst, hops)| (*dst, hops.to_vec())).collect(),
            deliveries: tx,
            sent: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            source_closes: Arc::clone(&source_closes),
            drop_ttl,
            fail_ttl,
        });
        let source = SimSource {
            rx: tokio::sync::Mutex::new(rx),
            closes: source_closes,
            close_error: None,
        };
        (network, source)
    }

    fn server(self: &Arc<Self>, source: SimSource, config: Config) -> Server {
        let sink = Arc::clone(self) as Arc<dyn ProbeSink>;
        Server::with_transport(config, Arc::new(source), sink)
    }

    fn inject(&self, frame: Vec<u8>, from: Ipv4Addr) {
        let _ = self.deliveries.send(Ok((frame, from)));
    }

    fn inject_error(&self, kind: io::ErrorKind) {
        let _ = self.deliveries.send(Err(io::Error::from(kind)));
    }

    fn sent(&self) -> Vec<SentProbe> {
        self.sent.lock().unwrap().clone()
    }

    fn sent_to(&self, dst: Ipv4Addr) -> usize {
        self.sent().iter().filter(|p| p.dst == dst).count()
    }
}

impl ProbeSink for SimNetwork {
    fn send(&self, header: &Ipv4Header, datagram: &[u8]) -> io::Result<()> {
        if self.closes.load(Ordering::SeqCst) > 0 {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed"));
        }
        if self.fail_ttl == Some(header.ttl) {
            return Err(io::Error::other("no buffer space"));
        }
        let dst = crate::packet::to_ipv4(header.dst).unwrap();
        self.sent.lock().unwrap().push(SentProbe {
            dst,
            id: header.identification,
            ttl: header.ttl,
        });

        let Some(route) = self.routes.get(&dst) else {
            return Ok(());
        };
        if self.drop_ttl == Some(header.ttl) {
            return Ok(());
        }
        let quoted = header
            .encode(datagram)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let (from, icmp_type, code) = match route.get(usize::from(header.ttl) - 1) {
            Some(router) => (*router, 11, 0),
            None => (dst, 3, 3),
        };
        self.inject(icmp_frame(from, icmp_type, code, &quoted), from);
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct SimSource {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    closes: Arc<AtomicUsize>,
    close_error: Option<io::ErrorKind>,
}

impl SimSource {
    fn failing_close(mut self, kind: io::ErrorKind) -> Self {
        self.close_error = Some(kind);
        self
    }
}

#[async_trait]
impl FrameSource for SimSource {
    async fn recv_frame(&self, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)> {
        let delivery = self.rx.lock().await.recv().await;
        let (frame, from) = delivery.ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))??;
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Ok((len, from))
    }

    fn close(&self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        match self.close_error {
            Some(kind) => Err(io::Error::from(kind)),
            None => Ok(()),
        }
    }
}

/// An ICMP error from `from` quoting the first 28 bytes of `probe`, behind
/// an outer IPv4 header as a raw socket delivers it
fn icmp_frame(from: Ipv4Addr, icmp_type: u8, code: u8, probe: &[u8]) -> Vec<u8> {
    let quote_len = probe.len().min(IPV4_HEADER_LEN + UDP_HEADER_LEN);
    let mut message = vec![icmp_type, code, 0, 0, 0, 0, 0, 0];
    message.extend_from_slice(&probe[..quote_len]);

    let mut outer = Ipv4Header::udp_probe(from, SRC, 0, 64);
    outer.protocol = PROTOCOL_ICMP;
    outer.dont_fragment = false;
    outer.encode(&message).unwrap()
}

/// An ICMP Time Exceeded quoting a probe that was never sent
fn forged_reply(from: Ipv4Addr, dst: Ipv4Addr, id: u16) -> Vec<u8> {
    let probe = Ipv4Header::udp_probe(SRC, dst, id, 1)
        .encode(&[0u8; UDP_HEADER_LEN])
        .unwrap();
    icmp_frame(from, 11, 0, &probe)
}

fn logging_config() -> (Config, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let config = Config::builder()
        .local_src_ip(SRC)
        .error_log(move |msg| sink.lock().unwrap().push(msg.to_string()))
        .build();
    (config, log)
}

fn quick(max_hop: u8, attempts: u8) -> Options {
    Options::default()
        .max_hop(max_hop)
        .attempts(attempts)
        .timeout(Duration::from_millis(50))
}

async fn finish(future: &TraceFuture) {
    tokio::time::timeout(WAIT, future.result())
        .await
        .expect("session did not complete");
}

#[tokio::test]
async fn test_single_hop_reaches_target() {
    let (network, source) = SimNetwork::new(&[(TARGET, &[])]);
    let (config, log) = logging_config();
    let server = network.server(source, config);

    let future = server
        .start_probe(CancellationToken::new(), &TARGET.to_string(), quick(1, 1))
        .await
        .unwrap();
    finish(&future).await;

    let (result, error) = future.wait().await;
    assert!(error.is_none(), "unexpected error: {:?}", error);
    assert!(result.reach);
    assert_eq!(result.dst_ip, TARGET);
    assert_eq!(result.hops.len(), 1);
    assert_eq!(result.hops[0].ttl, 1);
    assert_eq!(result.hops[0].nodes.len(), 1);
    assert_eq!(result.hops[0].nodes[0].ip, TARGET);
    assert_eq!(result.hops[0].nodes[0].rtts.len(), 1);
    assert!(log.lock().unwrap().is_empty());

    assert_eq!(
        network.sent(),
        vec![SentProbe {
            dst: TARGET,
            id: 1,
            ttl: 1
        }]
    );
}

#[tokio::test]
async fn test_multi_hop_path() {
    let (network, source) = SimNetwork::new(&[(TARGET, &[ROUTER_1, ROUTER_2])]);
    let (config, _log) = logging_config();
    let server = network.server(source, config);

    let future = server
        .start_probe_ip(CancellationToken::new(), TARGET, quick(4, 2))
        .unwrap();
    finish(&future).await;

    let mut result = future.result().await.clone();
    assert!(future.error().await.is_none());
    result.sort_hops();

    assert!(result.reach);
    let path: Vec<(u8, Ipv4Addr, usize)> = result
        .hops
        .iter()
        .map(|h| (h.ttl, h.nodes[0].ip, h.nodes[0].rtts.len()))
        .collect();
    assert_eq!(
        path,
        vec![
            (1, ROUTER_1, 2),
            (2, ROUTER_2, 2),
            (3, TARGET, 2),
            (4, TARGET, 2)
        ]
    );
    assert!(result.hops.iter().all(|h| h.nodes.len() == 1));

    // Identifications increase in send order and map back to their TTL
    let sent = network.sent();
    assert_eq!(sent.len(), 8);
    for (i, probe) in sent.iter().enumerate() {
        assert_eq!(usize::from(probe.id), i + 1);
        assert_eq!(result.options.ttl_for(probe.id), Some(probe.ttl));
    }
}

#[tokio::test]
async fn test_intermediate_replies_never_mark_reach() {
    let (network, source) = SimNetwork::new(&[(TARGET, &[ROUTER_1, ROUTER_2])]);
    let (config, _log) = logging_config();
    let server = network.server(source, config);

    let future = server
        .start_probe_ip(CancellationToken::new(), TARGET, quick(2, 1))
        .unwrap();
    finish(&future).await;

    let result = future.result().await;
    assert!(!result.reach);
    assert_eq!(result.hop_count(), 2);
}

#[tokio::test]
async fn test_concurrent_probes_share_session() {
    let (network, source) = SimNetwork::new(&[(TARGET, &[ROUTER_1])]);
    let (config, _log) = logging_config();
    let server = network.server(source, config);

    let first = server
        .start_probe_ip(CancellationToken::new(), TARGET, quick(3, 2))
        .unwrap();
    let second = server
        .start_probe(CancellationToken::new(), &TARGET.to_string(), quick(3, 2))
        .await
        .unwrap();
    assert!(TraceFuture::ptr_eq(&first, &second));
    assert_eq!(server.session_count(), 1);

    finish(&first).await;
    finish(&second).await;
    assert_eq!(first.result().await, second.result().await);
    assert_eq!(network.sent_to(TARGET), 6);
}

#[tokio::test]
async fn test_parallel_destinations() {
    let (network, source) =
        SimNetwork::new(&[(TARGET, &[ROUTER_1]), (OTHER_TARGET, &[ROUTER_1, ROUTER_2])]);
    let (config, _log) = logging_config();
    let server = network.server(source, config);

    let a = server
        .start_probe_ip(CancellationToken::new(), TARGET, quick(3, 1))
        .unwrap();
    let b = server
        .start_probe_ip(CancellationToken::new(), OTHER_TARGET, quick(3, 1))
        .unwrap();
    assert!(!TraceFuture::ptr_eq(&a, &b));
    assert_eq!(server.session_count(), 2);

    finish(&a).await;
    finish(&b).await;

    let a = a.result().await;
    let b = b.result().await;
    assert!(a.reach);
    assert!(b.reach);
    assert_eq!(a.hop(2).unwrap().nodes[0].ip, TARGET);
    assert_eq!(b.hop(2).unwrap().nodes[0].ip, ROUTER_2);
    assert_eq!(b.hop(3).unwrap().nodes[0].ip, OTHER_TARGET);
}

#[tokio::test]
async fn test_completed_session_is_deregistered() {
    let (network, source) = SimNetwork::new(&[(TARGET, &[])]);
    let (config, _log) = logging_config();
    let server = network.server(source, config);

    let first = server
        .start_probe_ip(CancellationToken::new(), TARGET, quick(1, 1))
        .unwrap();
    finish(&first).await;
    assert_eq!(server.session_count(), 0);

    let second = server
        .start_probe_ip(CancellationToken::new(), TARGET, quick(1, 1))
        .unwrap();
    assert!(!TraceFuture::ptr_eq(&first, &second));
    finish(&second).await;
    assert_eq!(network.sent_to(TARGET), 2);
    assert!(second.result().await.reach);
}

#[tokio::test]
async fn test_unknown_replies_are_dropped() {
    let (network, source) = SimNetwork::new(&[(TARGET, &[ROUTER_1])]);
    let (config, log) = logging_config();
    let server = network.server(source, config);

    let future = server
        .start_probe_ip(
            CancellationToken::new(),
            TARGET,
            quick(2, 1).timeout(Duration::from_millis(100)),
        )
        .unwrap();
    // Unknown identification for a live session, and a destination nobody probes
    network.inject(forged_reply(ROUTER_2, TARGET, 999), ROUTER_2);
    network.inject(forged_reply(ROUTER_2, OTHER_TARGET, 1), ROUTER_2);
    finish(&future).await;

    let result = future.result().await;
    assert!(future.error().await.is_none());
    assert_eq!(result.hop_count(), 2);
    assert!(result.hops.iter().all(|h| h.node(ROUTER_2).is_none()));
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_frames_are_logged() {
    let (network, source) = SimNetwork::new(&[(TARGET, &[])]);
    let (config, log) = logging_config();
    let server = network.server(source, config);

    let mut truncated = forged_reply(ROUTER_1, TARGET, 1);
    truncated.truncate(IPV4_HEADER_LEN + ICMP_HEADER_LEN + 10);
    network.inject(truncated, ROUTER_1);

    let mut wrong_version = forged_reply(ROUTER_1, TARGET, 1);
    wrong_version[IPV4_HEADER_LEN + ICMP_HEADER_LEN] = 0x65;
    network.inject(wrong_version, ROUTER_1);

    // Zero-length reads are skipped silently
    network.inject(Vec::new(), ROUTER_1);

    let future = server
        .start_probe_ip(CancellationToken::new(), TARGET, quick(1, 1))
        .unwrap();
    finish(&future).await;
    assert!(future.result().await.reach);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2, "{:?}", log);
    assert!(log.iter().all(|m| m.starts_with("drop frame from 10.0.0.1")));
    assert!(!server.is_closed());
}

#[tokio::test]
async fn test_lost_and_failed_probes() {
    let (network, source) = SimNetwork::build(&[(TARGET, &[ROUTER_1, ROUTER_2])], Some(1), Some(2));
    let (config, log) = logging_config();
    let server = network.server(source, config);

    let future = server
        .start_probe_ip(CancellationToken::new(), TARGET, quick(3, 1))
        .unwrap();
    finish(&future).await;

    let result = future.result().await;
    assert!(future.error().await.is_none());
    assert!(result.hop(1).is_none());
    assert!(result.hop(2).is_none());
    assert_eq!(result.hop(3).unwrap().nodes[0].ip, TARGET);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1, "{:?}", log);
    assert!(log[0].contains("send probe 2"));
}

#[tokio::test]
async fn test_cancel_stops_only_that_session() {
    let (network, source) = SimNetwork::new(&[(TARGET, &[ROUTER_1])]);
    let (config, _log) = logging_config();
    let server = network.server(source, config);

    let ctx = CancellationToken::new();
    let silent = server
        .start_probe_ip(
            ctx.clone(),
            SILENT_TARGET,
            quick(2, 1).timeout(Duration::from_secs(30)),
        )
        .unwrap();
    let live = server
        .start_probe_ip(CancellationToken::new(), TARGET, quick(2, 1))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    ctx.cancel();

    finish(&silent).await;
    assert!(matches!(silent.error().await, Some(TracerouteError::Cancelled)));
    assert_eq!(silent.result().await.hop_count(), 0);

    finish(&live).await;
    assert!(live.error().await.is_none());
    assert!(live.result().await.reach);
    assert!(!server.is_closed());
}

/// Answers probe 1 late and stalls the sender inside the write of probe 2
struct SlowPath {
    network: Arc<SimNetwork>,
    reply_delay: Duration,
    stall: Duration,
}

impl ProbeSink for SlowPath {
    fn send(&self, header: &Ipv4Header, datagram: &[u8]) -> io::Result<()> {
        // The destination has no route, so the network only records the probe
        self.network.send(header, datagram)?;
        match header.identification {
            1 => {
                let quoted = header
                    .encode(datagram)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                let frame = icmp_frame(ROUTER_1, 11, 0, &quoted);
                let network = Arc::clone(&self.network);
                let delay = self.reply_delay;
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    network.inject(frame, ROUTER_1);
                });
            }
            2 => std::thread::sleep(self.stall),
            _ => {}
        }
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        self.network.close()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reply_slower_than_timeout_is_dropped() {
    let (network, source) = SimNetwork::new(&[]);
    let sink = SlowPath {
        network: Arc::clone(&network),
        reply_delay: Duration::from_millis(150),
        stall: Duration::from_millis(300),
    };
    let (config, log) = logging_config();
    let server = Server::with_transport(config, Arc::new(source), Arc::new(sink));

    // The collection window only opens after probe 2, so reply 1 reaches
    // the session while it is still collecting, 150 ms after its probe
    let options = quick(2, 1).timeout(Duration::from_millis(100));
    let future = server
        .start_probe_ip(CancellationToken::new(), SILENT_TARGET, options)
        .unwrap();
    finish(&future).await;

    let result = future.result().await;
    assert!(future.error().await.is_none());
    assert_eq!(network.sent_to(SILENT_TARGET), 2);
    assert!(result.hops.is_empty(), "late reply kept: {:?}", result.hops);
    assert!(!result.reach);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_out_of_order_replies_keep_arrival_order() {
    // No routes: every reply below is injected by hand
    let (network, source) = SimNetwork::new(&[]);
    let (config, log) = logging_config();
    let server = network.server(source, config);

    let options = quick(3, 1).timeout(Duration::from_millis(300));
    let future = server
        .start_probe_ip(CancellationToken::new(), TARGET, options)
        .unwrap();
    tokio::time::timeout(WAIT, async {
        while network.sent_to(TARGET) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("probes were not sent");

    network.inject(forged_reply(TARGET, TARGET, 3), TARGET);
    network.inject(forged_reply(ROUTER_2, TARGET, 2), ROUTER_2);
    network.inject(forged_reply(ROUTER_1, TARGET, 1), ROUTER_1);
    finish(&future).await;

    let result = future.result().await;
    assert!(future.error().await.is_none());
    assert!(result.reach);
    let arrival: Vec<u8> = result.hops.iter().map(|h| h.ttl).collect();
    assert_eq!(arrival, vec![3, 2, 1]);
    let sorted: Vec<u8> = result.sorted_hops().iter().map(|h| h.ttl).collect();
    assert_eq!(sorted, vec![1, 2, 3]);
    assert_eq!(result.hop(2).unwrap().nodes[0].ip, ROUTER_2);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_completes_sessions() {
    let (network, source) = SimNetwork::new(&[(TARGET, &[ROUTER_1])]);
    let (config, _log) = logging_config();
    let server = Arc::new(network.server(source, config));

    let future = server
        .start_probe_ip(
            CancellationToken::new(),
            SILENT_TARGET,
            quick(3, 1).timeout(Duration::from_secs(30)),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let racers: Vec<_> = (0..4)
        .map(|_| {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.shutdown() })
        })
        .collect();
    for racer in racers {
        assert!(racer.await.unwrap().is_ok());
    }
    assert!(server.shutdown().is_ok());
    assert_eq!(network.closes.load(Ordering::SeqCst), 1);
    assert_eq!(network.source_closes.load(Ordering::SeqCst), 1);

    finish(&future).await;
    assert!(matches!(future.error().await, Some(TracerouteError::ServerClosed)));

    let err = server
        .start_probe(CancellationToken::new(), &TARGET.to_string(), quick(1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, TracerouteError::ServerClosed));
}

#[tokio::test]
async fn test_empty_ttl_range_rejected() {
    let (network, source) = SimNetwork::new(&[(TARGET, &[])]);
    let (config, _log) = logging_config();
    let server = network.server(source, config);

    let err = server
        .start_probe_ip(CancellationToken::new(), TARGET, quick(3, 1).first_hop(5))
        .unwrap_err();
    assert!(matches!(err, TracerouteError::ConfigError(_)));
    assert_eq!(server.session_count(), 0);
    assert!(network.sent().is_empty());
}

#[tokio::test]
async fn test_oversized_payload_rejected() {
    let (network, source) = SimNetwork::new(&[(TARGET, &[])]);
    let (config, log) = logging_config();
    let server = network.server(source, config);

    let oversized = quick(1, 1).packet_size(1 << 20);
    let err = server
        .start_probe_ip(CancellationToken::new(), TARGET, oversized)
        .unwrap_err();
    assert!(matches!(err, TracerouteError::ConfigError(_)));
    assert_eq!(server.session_count(), 0);
    assert!(network.sent().is_empty());
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_read_error_shuts_server_down() {
    let (network, source) = SimNetwork::new(&[]);
    let (config, log) = logging_config();
    let server = network.server(source, config);

    let future = server
        .start_probe_ip(
            CancellationToken::new(),
            SILENT_TARGET,
            quick(1, 1).timeout(Duration::from_secs(30)),
        )
        .unwrap();
    network.inject_error(io::ErrorKind::ConnectionReset);

    finish(&future).await;
    assert!(matches!(future.error().await, Some(TracerouteError::ServerClosed)));
    assert!(server.is_closed());
    assert_eq!(network.closes.load(Ordering::SeqCst), 1);
    assert_eq!(network.source_closes.load(Ordering::SeqCst), 1);
    assert!(log
        .lock()
        .unwrap()
        .iter()
        .any(|m| m.starts_with("read icmp socket")));
}

#[tokio::test]
async fn test_drop_closes_both_sockets() {
    let (network, source) = SimNetwork::new(&[]);
    let (config, _log) = logging_config();
    drop(network.server(source, config));
    assert_eq!(network.closes.load(Ordering::SeqCst), 1);
    assert_eq!(network.source_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_reports_read_socket_close_error() {
    let (network, source) = SimNetwork::new(&[]);
    let source = source.failing_close(io::ErrorKind::Interrupted);
    let (config, _log) = logging_config();
    let server = network.server(source, config);

    match server.shutdown() {
        Err(TracerouteError::SocketError(e)) => assert_eq!(e.kind(), io::ErrorKind::Interrupted),
        other => panic!("expected close error, got {:?}", other),
    }
    // The write socket was still closed, and nothing is closed twice
    assert_eq!(network.closes.load(Ordering::SeqCst), 1);
    assert!(server.shutdown().is_ok());
    drop(server);
    assert_eq!(network.source_closes.load(Ordering::SeqCst), 1);
}
