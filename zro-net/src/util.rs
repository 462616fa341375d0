use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

use crate::{Error, Result};

/// Create a valid tcp address that includes the prefix.
pub(crate) fn tcp_endpoint(s: &str) -> String {
    if s.contains("://") {
        s.to_string()
    } else {
        format!("tcp://{}", s)
    }
}

/// Checks whether the address already carries a port, with or without the
/// transport prefix.
pub fn has_port(addr: &str) -> bool {
    let host = match addr.find("://") {
        Some(idx) => &addr[idx + 3..],
        None => addr,
    };
    host.contains(':')
}

/// Builds an endpoint string out of an ip and an optional port.
///
/// A missing ip with a port means all interfaces, `tcp://*:{port}`. The
/// `tcp://` prefix is added when missing. If the ip already includes a port
/// it is used as is.
pub fn get_address(ip: &str, port: Option<u16>) -> Result<String> {
    match (ip.is_empty(), port) {
        (true, None) => Err(Error::Other("need a port or an ip".to_string())),
        (true, Some(port)) => Ok(format!("tcp://*:{}", port)),
        (false, _) => {
            let endpoint = tcp_endpoint(ip);
            match port {
                Some(port) if !has_port(&endpoint) => Ok(format!("{}:{}", endpoint, port)),
                _ => Ok(endpoint),
            }
        }
    }
}

/// Resolves a host name (or `localhost`) to an IPv4 address string, for
/// comparing against peer addresses.
pub fn resolve_ipv4(host: &str) -> Result<String> {
    if host.eq_ignore_ascii_case("localhost") {
        return Ok(Ipv4Addr::LOCALHOST.to_string());
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip.to_string());
    }
    let addrs = (host, 0).to_socket_addrs()?;
    for addr in addrs {
        if let IpAddr::V4(ip) = addr.ip() {
            return Ok(ip.to_string());
        }
    }
    Err(Error::HostUnreachable(host.to_string()))
}

/// Name of the user running this process.
pub fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Derives a per-user port in the range `1024..10000`.
///
/// The user name is left padded with `0` to 16 bytes and truncated to the
/// first 16, the bytes are read as a big-endian 128 bit integer, and the
/// result is reduced modulo 8976.
pub fn port_for_user(username: &str) -> u16 {
    let bytes = username.as_bytes();
    let mut key = [b'0'; 16];
    if bytes.len() >= 16 {
        key.copy_from_slice(&bytes[..16]);
    } else {
        key[16 - bytes.len()..].copy_from_slice(bytes);
    }
    (u128::from_be_bytes(key) % 8976) as u16 + 1024
}
