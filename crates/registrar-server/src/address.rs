use registrar_core::{RegistryError, RegistryResult};
use std::net::{IpAddr, UdpSocket};

/// Host to publish for an announced address. Empty hosts take the caller's
/// peer address; loopback hosts are useless to other machines and are
/// replaced with this machine's own address.
pub fn resolve_host(announced: &str, peer: Option<IpAddr>, local_ip: Option<IpAddr>) -> RegistryResult<String> {
    let host = if announced.is_empty() {
        peer.ok_or(RegistryError::NoPeerAddress)?.to_string()
    } else {
        announced.to_string()
    };
    if is_loopback(&host) {
        return local_ip
            .map(|ip| ip.to_string())
            .ok_or(RegistryError::LoopbackUnresolvable(host));
    }
    Ok(host)
}

fn is_loopback(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

/// Destinations whose route selects the outgoing interface: a public
/// documentation address for hosts with a default route, then one address in
/// each private range for LAN-only hosts.
const ROUTE_PROBES: [&str; 4] = [
    "192.0.2.1:9",
    "10.255.255.254:9",
    "172.31.255.254:9",
    "192.168.255.254:9",
];

/// A non-loopback IPv4 address of this machine, as picked by the routing
/// table for the first destination that has a route. Connecting a UDP socket
/// sends nothing. Interfaces reachable by no route at all are not found;
/// set `--local-ip` for those hosts.
pub fn detect_local_ip() -> Option<IpAddr> {
    ROUTE_PROBES.iter().find_map(|dest| source_address_for(dest))
}

fn source_address_for(dest: &str) -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(dest).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    usable_local(ip).then_some(ip)
}

fn usable_local(ip: IpAddr) -> bool {
    !ip.is_loopback() && !ip.is_unspecified()
}
