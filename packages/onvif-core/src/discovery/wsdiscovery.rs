//! WS-Discovery probe codec and multicast probing.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use local_ip_address::list_afinet_netifas;
use quick_xml::events::Event;
use quick_xml::name::QName;
use quick_xml::reader::Reader;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::types::{DiscoveryError, DiscoveryResult, ProbeResult};
use crate::model::split_host_port;
use crate::protocol_constants::{
    MAX_DATAGRAM_SIZE, MULTICAST_READ_DEADLINE_MS, NS_NETWORK_VIDEO, NS_SOAP_ENV,
    NS_WS_ADDRESSING_2004, NS_WS_DISCOVERY, NVT_DEVICE_TYPE, WS_DISCOVERY_MULTICAST_ADDR,
};
use crate::soap::xml::extract_xml_text;

/// Builds a `Probe` for network video transmitters.
pub fn build_probe(message_id: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><s:Envelope xmlns:s="{NS_SOAP_ENV}" xmlns:a="{NS_WS_ADDRESSING_2004}" xmlns:d="{NS_WS_DISCOVERY}" xmlns:dn="{NS_NETWORK_VIDEO}"><s:Header><a:Action s:mustUnderstand="1">{NS_WS_DISCOVERY}/Probe</a:Action><a:MessageID>uuid:{message_id}</a:MessageID><a:ReplyTo><a:Address>{NS_WS_ADDRESSING_2004}/role/anonymous</a:Address></a:ReplyTo><a:To s:mustUnderstand="1">urn:schemas-xmlsoap-org:ws:2005:04:discovery</a:To></s:Header><s:Body><d:Probe><d:Types>{NVT_DEVICE_TYPE}</d:Types></d:Probe></s:Body></s:Envelope>"#
    )
}

/// Builds a probe with a fresh message id.
pub fn new_probe() -> String {
    build_probe(&uuid::Uuid::new_v4().to_string())
}

/// Parses every `ProbeMatch` of a datagram.
///
/// Matches without an endpoint reference or a usable IPv4 XAddr are dropped.
pub fn parse_probe_matches(raw: &str) -> Vec<ProbeResult> {
    probe_match_elements(raw)
        .into_iter()
        .filter_map(parse_probe_match)
        .collect()
}

fn probe_match_elements(raw: &str) -> Vec<&str> {
    let mut reader = Reader::from_str(raw);
    let mut out = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"ProbeMatch" => {
                let start = reader.buffer_position() as usize;
                let end_name = e.name().as_ref().to_vec();
                match reader.read_to_end(QName(&end_name)) {
                    Ok(span) => {
                        if let Some(inner) = raw.get(span.start as usize..span.end as usize) {
                            out.push(inner);
                        }
                    }
                    Err(e) => {
                        log::debug!("[Discovery] Truncated ProbeMatch at {}: {}", start, e);
                        break;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                log::debug!("[Discovery] Unreadable probe response: {}", e);
                break;
            }
            _ => {}
        }
    }
    out
}

fn parse_probe_match(element: &str) -> Option<ProbeResult> {
    let endpoint_ref = extract_xml_text(element, "Address").filter(|s| !s.is_empty())?;
    let xaddrs: Vec<String> = extract_xml_text(element, "XAddrs")
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let scopes = extract_xml_text(element, "Scopes")
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let (host, port) = xaddrs.iter().find_map(|x| {
        let (host, port) = split_host_port(x)?;
        host.parse::<Ipv4Addr>().ok().map(|_| (host, port))
    })?;

    Some(ProbeResult {
        host,
        port,
        endpoint_ref,
        xaddrs,
        scopes,
        raw: element.to_string(),
    })
}

/// Returns the IPv4 address of a named interface.
pub fn interface_ipv4(name: &str) -> DiscoveryResult<Ipv4Addr> {
    let interfaces = list_afinet_netifas().map_err(|e| {
        log::warn!("[Discovery] Failed to list network interfaces: {}", e);
        DiscoveryError::NoInterfaces
    })?;
    if interfaces.is_empty() {
        return Err(DiscoveryError::NoInterfaces);
    }
    interfaces
        .into_iter()
        .find_map(|(iface, addr)| match addr {
            IpAddr::V4(ip) if iface == name => Some(ip),
            _ => None,
        })
        .ok_or_else(|| DiscoveryError::InterfaceNotFound(name.to_string()))
}

/// Creates a UDP socket bound to an interface for multicast probing.
fn create_socket(iface_ip: Ipv4Addr) -> DiscoveryResult<UdpSocket> {
    let bind_addr = SocketAddr::new(IpAddr::V4(iface_ip), 0);

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::SocketBind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[Discovery] Failed to set SO_REUSEADDR on {}: {}", iface_ip, e);
    }
    if let Err(e) = socket.set_multicast_if_v4(&iface_ip) {
        log::warn!("[Discovery] Failed to set multicast interface {}: {}", iface_ip, e);
    }
    if let Err(e) = socket.set_multicast_ttl_v4(1) {
        log::warn!("[Discovery] Failed to set multicast TTL on {}: {}", iface_ip, e);
    }

    socket
        .set_nonblocking(true)
        .map_err(DiscoveryError::SocketBind)?;
    socket
        .bind(&bind_addr.into())
        .map_err(DiscoveryError::SocketBind)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

/// Sends one multicast probe from `interface` and collects matches until the
/// read deadline or cancellation.
pub async fn multicast_probe(
    interface: &str,
    cancel: &CancellationToken,
) -> DiscoveryResult<Vec<ProbeResult>> {
    let iface_ip = interface_ipv4(interface)?;
    let socket = create_socket(iface_ip)?;

    let probe = new_probe();
    socket
        .send_to(probe.as_bytes(), WS_DISCOVERY_MULTICAST_ADDR)
        .await
        .map_err(DiscoveryError::SendProbe)?;
    log::debug!(
        "[Discovery] Sent multicast probe from {} ({})",
        interface,
        iface_ip
    );

    let deadline = Instant::now() + Duration::from_millis(MULTICAST_READ_DEADLINE_MS);
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut results = Vec::new();
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            r = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)) => r,
        };
        match received {
            Err(_) => break,
            Ok(Ok((len, from))) => {
                let text = String::from_utf8_lossy(&buf[..len]);
                let matches = parse_probe_matches(&text);
                log::trace!("[Discovery] {} match(es) from {}", matches.len(), from);
                results.extend(matches);
            }
            Ok(Err(e)) => {
                log::debug!("[Discovery] Multicast receive failed: {}", e);
                break;
            }
        }
    }

    log::info!(
        "[Discovery] Multicast probe on {} found {} device(s)",
        interface,
        results.len()
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::PROBE_MATCHES;

    #[test]
    fn probe_targets_network_video_transmitters() {
        let probe = build_probe("1234");
        assert!(probe.contains("<a:MessageID>uuid:1234</a:MessageID>"));
        assert!(probe.contains("<d:Types>dn:NetworkVideoTransmitter</d:Types>"));
        assert!(probe.contains(NS_WS_DISCOVERY));
    }

    #[test]
    fn probe_match_fields_are_extracted() {
        let results = parse_probe_matches(PROBE_MATCHES);
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.endpoint_ref, "urn:uuid:A");
        assert_eq!(result.host, "192.168.1.1");
        assert_eq!(result.port, 8080);
        assert_eq!(result.xaddr(), "192.168.1.1:8080");
        assert_eq!(result.xaddrs.len(), 2);
        assert_eq!(result.scopes.len(), 3);
        assert!(result.raw.contains("urn:uuid:A"));
    }

    #[test]
    fn garbage_yields_no_matches() {
        assert!(parse_probe_matches("hello").is_empty());
        assert!(parse_probe_matches("<a><b></a>").is_empty());
    }
}
