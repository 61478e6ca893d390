//! Unicast sweep of configured subnets.
//!
//! Every usable host address is fed through a bounded channel to a fixed
//! pool of workers. Each worker probes the host's ports with the configured
//! transport and hands the bytes to a [`ProbeProtocol`] for parsing.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use ipnetwork::{IpNetwork, Ipv4Network};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::types::ProbeResult;
use super::wsdiscovery::{new_probe, parse_probe_matches};
use crate::config::ProbeTransport;
use crate::protocol_constants::{MAX_DATAGRAM_SIZE, NETSCAN_CHANNEL_CAPACITY};

// ─────────────────────────────────────────────────────────────────────────────
// Address enumeration
// ─────────────────────────────────────────────────────────────────────────────

/// Number of addresses [`enumerate`] yields for a prefix length.
///
/// `/31` and `/32` are a single address; `/0` and `/1` are never swept.
pub fn computed_size(prefix: u8) -> u64 {
    match prefix {
        0 | 1 => 0,
        31 | 32 => 1,
        p if p > 32 => 0,
        p => (1u64 << (32 - u32::from(p))) - 2,
    }
}

/// Usable host addresses of a network: `netid+1 .. bcast-1`.
pub fn enumerate(net: Ipv4Network) -> Box<dyn Iterator<Item = Ipv4Addr> + Send> {
    match net.prefix() {
        0 | 1 => Box::new(std::iter::empty()),
        31 | 32 => Box::new(std::iter::once(net.ip())),
        _ => {
            let first = u32::from(net.network()) + 1;
            let last = u32::from(net.broadcast()) - 1;
            Box::new((first..=last).map(Ipv4Addr::from))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pluggable policies
// ─────────────────────────────────────────────────────────────────────────────

/// Chooses which ports of a host are probed.
pub trait ProbeFilter: Send + Sync {
    fn ports(&self, host: Ipv4Addr, candidates: &[u16]) -> Vec<u16>;
}

/// Probes every configured port.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllPorts;

impl ProbeFilter for AllPorts {
    fn ports(&self, _host: Ipv4Addr, candidates: &[u16]) -> Vec<u16> {
        candidates.to_vec()
    }
}

/// Protocol spoken once a probe connection is open.
pub trait ProbeProtocol: Send + Sync {
    /// Bytes written to the host.
    fn probe_message(&self) -> Vec<u8>;

    /// Parses everything read from `host:port` before the deadline.
    fn parse(&self, host: Ipv4Addr, port: u16, response: &[u8]) -> Vec<ProbeResult>;
}

/// WS-Discovery `Probe` / `ProbeMatches`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsDiscoveryProtocol;

impl ProbeProtocol for WsDiscoveryProtocol {
    fn probe_message(&self) -> Vec<u8> {
        new_probe().into_bytes()
    }

    fn parse(&self, host: Ipv4Addr, port: u16, response: &[u8]) -> Vec<ProbeResult> {
        let text = String::from_utf8_lossy(response);
        let results = parse_probe_matches(&text);
        if results.is_empty() && !response.is_empty() {
            log::debug!("[NetScan] {}:{} answered without a usable ProbeMatch", host, port);
        }
        results
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scanner
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters of one sweep, snapshotted from config.
#[derive(Debug, Clone)]
pub struct NetScanParams {
    pub subnets: Vec<IpNetwork>,
    pub ports: Vec<u16>,
    pub transport: ProbeTransport,
    pub probe_timeout: Duration,
    pub async_limit: usize,
    /// Timeouts tolerated per host before its remaining ports are skipped; 0 = no cap.
    pub max_timeouts_per_host: usize,
}

/// Concurrent subnet sweeper.
pub struct NetScanner {
    protocol: Arc<dyn ProbeProtocol>,
    filter: Arc<dyn ProbeFilter>,
}

impl Default for NetScanner {
    fn default() -> Self {
        Self::new(Arc::new(WsDiscoveryProtocol), Arc::new(AllPorts))
    }
}

impl NetScanner {
    pub fn new(protocol: Arc<dyn ProbeProtocol>, filter: Arc<dyn ProbeFilter>) -> Self {
        Self { protocol, filter }
    }

    /// Sweeps every subnet and returns all probe results.
    ///
    /// Cancellation stops address generation and new probes; probes already
    /// in flight finish and their results are kept.
    pub async fn scan(&self, params: &NetScanParams, cancel: &CancellationToken) -> Vec<ProbeResult> {
        let networks: Vec<Ipv4Network> = params
            .subnets
            .iter()
            .filter_map(|net| match net {
                IpNetwork::V4(v4) => Some(*v4),
                IpNetwork::V6(v6) => {
                    log::warn!("[NetScan] Skipping IPv6 subnet {}", v6);
                    None
                }
            })
            .collect();

        if networks.is_empty() {
            log::warn!("[NetScan] No IPv4 subnets configured, nothing to scan");
            return Vec::new();
        }

        let hosts: u64 = networks.iter().map(|n| computed_size(n.prefix())).sum();
        let estimated = hosts.saturating_mul(params.ports.len() as u64);
        let workers = (params.async_limit.max(1) as u64).min(estimated.max(1)) as usize;
        log::info!(
            "[NetScan] Sweeping {} host(s) on {} subnet(s) with {} worker(s) via {}",
            hosts,
            networks.len(),
            workers,
            params.transport
        );

        let (tx, rx) = mpsc::channel::<Ipv4Addr>(NETSCAN_CHANNEL_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));

        let generator_cancel = cancel.clone();
        let generator = tokio::spawn(async move {
            for net in networks {
                for ip in enumerate(net) {
                    tokio::select! {
                        _ = generator_cancel.cancelled() => return,
                        sent = tx.send(ip) => if sent.is_err() { return },
                    }
                }
            }
        });

        let worker_futures = (0..workers).map(|_| {
            let rx = Arc::clone(&rx);
            async move {
                let mut found = Vec::new();
                loop {
                    let next = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            _ = cancel.cancelled() => None,
                            ip = rx.recv() => ip,
                        }
                    };
                    let Some(ip) = next else { break };
                    found.extend(self.probe_host(ip, params).await);
                }
                found
            }
        });

        let results: Vec<ProbeResult> = join_all(worker_futures).await.into_iter().flatten().collect();
        generator.abort();

        log::info!("[NetScan] Sweep finished with {} response(s)", results.len());
        results
    }

    async fn probe_host(&self, ip: Ipv4Addr, params: &NetScanParams) -> Vec<ProbeResult> {
        let mut results = Vec::new();
        let mut timeouts = 0usize;

        for port in self.filter.ports(ip, &params.ports) {
            match self.probe_port(ip, port, params).await {
                Ok(found) => results.extend(found),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    timeouts += 1;
                    if params.max_timeouts_per_host > 0 && timeouts >= params.max_timeouts_per_host {
                        log::trace!("[NetScan] {} hit the timeout cap, skipping", ip);
                        break;
                    }
                }
                Err(e) if is_host_unreachable(&e) => {
                    log::trace!("[NetScan] {} unreachable, skipping", ip);
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => continue,
                Err(e) => log::trace!("[NetScan] {}:{} probe failed: {}", ip, port, e),
            }
        }
        results
    }

    async fn probe_port(
        &self,
        ip: Ipv4Addr,
        port: u16,
        params: &NetScanParams,
    ) -> io::Result<Vec<ProbeResult>> {
        let target = SocketAddr::from((ip, port));
        let deadline = Instant::now() + params.probe_timeout;
        let message = self.protocol.probe_message();

        let response = match params.transport {
            ProbeTransport::Udp => udp_exchange(target, &message, deadline).await?,
            ProbeTransport::Tcp => tcp_exchange(target, &message, deadline).await?,
        };
        Ok(self.protocol.parse(ip, port, &response))
    }
}

fn timed_out(target: SocketAddr) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("no answer from {target}"))
}

/// Sends one datagram and collects every reply until the deadline.
async fn udp_exchange(target: SocketAddr, message: &[u8], deadline: Instant) -> io::Result<Vec<u8>> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
    socket.connect(target).await?;
    socket.send(message).await?;

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut response = Vec::new();
    let mut answered = false;
    loop {
        match tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await {
            Err(_) => break,
            Ok(Ok(len)) => {
                answered = true;
                response.extend_from_slice(&buf[..len]);
            }
            Ok(Err(e)) => return Err(e),
        }
    }
    if answered {
        Ok(response)
    } else {
        Err(timed_out(target))
    }
}

/// Connects, writes the probe, and reads until EOF or the deadline.
async fn tcp_exchange(target: SocketAddr, message: &[u8], deadline: Instant) -> io::Result<Vec<u8>> {
    let mut stream = tokio::time::timeout_at(deadline, TcpStream::connect(target))
        .await
        .map_err(|_| timed_out(target))??;
    stream.write_all(message).await?;

    let mut response = Vec::new();
    let mut buf = vec![0u8; 8192];
    loop {
        match tokio::time::timeout_at(deadline, stream.read(&mut buf)).await {
            Err(_) | Ok(Ok(0)) => break,
            Ok(Ok(len)) => response.extend_from_slice(&buf[..len]),
            Ok(Err(e)) => return Err(e),
        }
    }
    Ok(response)
}

#[cfg(unix)]
fn is_host_unreachable(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EHOSTUNREACH)
}

#[cfg(not(unix))]
fn is_host_unreachable(_err: &io::Error) -> bool {
    false
}
