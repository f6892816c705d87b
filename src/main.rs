//! mtrace - concurrent UDP traceroute
//!
//! Traces every host given on the command line at the same time over one
//! pair of raw sockets, then prints the results in argument order.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use clap::Parser;
use mtrace::socket::utils::is_root;
use mtrace::traceroute::config::{
    DEFAULT_ATTEMPTS, DEFAULT_FIRST_HOP, DEFAULT_MAX_HOP, DEFAULT_PACKET_SIZE, DEFAULT_PORT,
    MAX_PACKET_SIZE,
};
use mtrace::{Config, Options, Server, TraceFuture, TraceResult, TracerouteError};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the traceroute tool.
#[derive(Parser, Debug)]
#[clap(author, version, about = "Concurrent UDP traceroute to many hosts", long_about = None)]
struct Args {
    /// Target hostnames or IPv4 addresses
    #[clap(required = true)]
    hosts: Vec<String>,

    /// Base destination port; probe N is sent to port + N
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// First TTL to probe
    #[clap(short = 'f', long, default_value_t = DEFAULT_FIRST_HOP)]
    first_ttl: u8,

    /// Maximum number of hops
    #[clap(short = 'm', long, default_value_t = DEFAULT_MAX_HOP)]
    max_hops: u8,

    /// Number of probes per hop
    #[clap(short = 'q', long, default_value_t = DEFAULT_ATTEMPTS)]
    queries: u8,

    /// Time to wait for replies after the last probe, in milliseconds
    #[clap(short = 'w', long, default_value_t = 1000)]
    timeout_ms: u64,

    /// UDP payload size in bytes
    #[clap(short = 's', long, default_value_t = DEFAULT_PACKET_SIZE)]
    packet_size: usize,

    /// Source address for probes (detected when omitted)
    #[clap(long)]
    source: Option<Ipv4Addr>,

    /// Output results in JSON format
    #[clap(long)]
    json: bool,

    /// Enable verbose logging (-v debug, -vv trace)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn validate(&self) -> Result<()> {
        if self.first_ttl == 0 {
            anyhow::bail!("first-ttl must be at least 1");
        }
        if self.first_ttl > self.max_hops {
            anyhow::bail!(
                "first-ttl ({}) must not exceed max-hops ({})",
                self.first_ttl,
                self.max_hops
            );
        }
        if self.queries == 0 {
            anyhow::bail!("queries must be at least 1");
        }
        if self.timeout_ms == 0 {
            anyhow::bail!("timeout-ms must be greater than 0");
        }
        if self.packet_size > MAX_PACKET_SIZE {
            anyhow::bail!("packet-size must not exceed {}", MAX_PACKET_SIZE);
        }
        Ok(())
    }

    fn options(&self) -> Options {
        Options::default()
            .port(self.port)
            .first_hop(self.first_ttl)
            .max_hop(self.max_hops)
            .attempts(self.queries)
            .timeout(Duration::from_millis(self.timeout_ms))
            .packet_size(self.packet_size)
    }

    fn config(&self) -> Config {
        let builder = Config::builder();
        match self.source {
            Some(ip) => builder.local_src_ip(ip).build(),
            None => builder.build(),
        }
    }
}

/// JSON output for one traced host
#[derive(Debug, serde::Serialize)]
struct JsonTrace<'a> {
    host: &'a str,
    #[serde(flatten)]
    result: TraceResult,
    error: Option<String>,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    // Create single-threaded tokio runtime for lower overhead
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(async_main(args)) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn async_main(args: Args) -> Result<()> {
    args.validate()?;

    let server = match Server::new(args.config()) {
        Ok(server) => server,
        Err(e) => {
            if e.is_permission_denied() || !is_root() {
                eprintln!("mtrace needs raw sockets: run as root or grant CAP_NET_RAW");
                eprintln!("  sudo setcap cap_net_raw+ep $(which mtrace)");
            }
            return Err(e).context("Create traceroute server failed");
        }
    };

    let options = args.options();
    let ctx = CancellationToken::new();
    let mut traces: Vec<(&str, TraceFuture)> = Vec::with_capacity(args.hosts.len());
    for host in &args.hosts {
        match server.start_probe(ctx.child_token(), host, options).await {
            Ok(future) => traces.push((host.as_str(), future)),
            Err(TracerouteError::ResolutionError(e)) => {
                tracing::debug!("resolve {}: {}", host, e);
                println!("Invalid host name: {}", host);
            }
            Err(e) => return Err(e.into()),
        }
    }

    if args.json {
        let mut output = Vec::with_capacity(traces.len());
        for (host, future) in &traces {
            let (result, error) = future.wait().await;
            let mut result = result.clone();
            result.sort_hops();
            output.push(JsonTrace {
                host,
                result,
                error: error.map(ToString::to_string),
            });
        }
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for (host, future) in &traces {
            let (result, error) = future.wait().await;
            print!("{}", render_text(host, result, error));
        }
    }

    server.shutdown()?;
    Ok(())
}

/// Classic traceroute text layout: one line per replying node, hops by TTL
fn render_text(host: &str, result: &TraceResult, error: Option<&TracerouteError>) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(
        out,
        "traceroute to {} ({}), {} hops max, {} byte packets",
        host, result.dst_ip, result.options.max_hop, result.options.packet_size
    );
    if let Some(e) = error {
        let _ = writeln!(out, "Error: {}", e);
        return out;
    }

    for hop in result.sorted_hops() {
        let _ = write!(out, " {}", hop.ttl);
        for node in &hop.nodes {
            let _ = write!(out, "\t{}", node.ip);
            for rtt in node.rtts_ms() {
                let _ = write!(out, "\t{:.3} ms", rtt);
            }
            out.push('\n');
        }
    }
    out
}
