//! Local address discovery for the startup banner.

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs, UdpSocket};

/// Non-loopback IPv4 addresses other devices on the LAN can reach us at.
///
/// Combines the addresses the host name resolves to with the source address
/// the OS would pick for an outbound route. Nothing is sent on the network.
/// Falls back to `127.0.0.1` when neither source yields anything.
pub fn local_ips() -> Vec<Ipv4Addr> {
    let mut ips = Vec::new();

    if let Some(hostname) = hostname() {
        if let Ok(addrs) = (hostname.as_str(), 0).to_socket_addrs() {
            for addr in addrs {
                push_unique(&mut ips, addr.ip());
            }
        }
    }

    if let Some(ip) = outbound_ip() {
        push_unique(&mut ips, ip);
    }

    if ips.is_empty() {
        ips.push(Ipv4Addr::LOCALHOST);
    }
    ips
}

/// Banner lines, one URL per address.
pub fn client_urls(port: u16) -> Vec<String> {
    local_ips()
        .into_iter()
        .map(|ip| format!("http://{}:{}", ip, port))
        .collect()
}

fn push_unique(ips: &mut Vec<Ipv4Addr>, ip: IpAddr) {
    if let IpAddr::V4(v4) = ip {
        if !v4.is_loopback() && !v4.is_unspecified() && !ips.contains(&v4) {
            ips.push(v4);
        }
    }
}

fn outbound_ip() -> Option<IpAddr> {
    // UDP connect only sets the default peer; no packet leaves the host
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_and_ipv6_are_skipped() {
        let mut ips = Vec::new();
        push_unique(&mut ips, IpAddr::V4(Ipv4Addr::LOCALHOST));
        push_unique(&mut ips, "::1".parse().expect("ipv6"));
        push_unique(&mut ips, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));
        push_unique(&mut ips, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));

        assert_eq!(ips, vec![Ipv4Addr::new(192, 168, 1, 20)]);
    }

    #[test]
    fn test_always_returns_an_address() {
        assert!(!local_ips().is_empty());
        assert!(client_urls(8080).iter().all(|url| url.ends_with(":8080")));
    }
}
