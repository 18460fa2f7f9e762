//! Network utility functions
//!
//! This module provides utility functions for network operations.

use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use super::error::{DevproxyError, Result};

/// Parse a socket address
///
/// # Arguments
///
/// * `addr` - The address string to parse
///
/// # Returns
///
/// The parsed `SocketAddr`
pub fn parse_socket_addr(addr: &str) -> Result<SocketAddr> {
    // Try direct parsing first
    if let Ok(socket_addr) = SocketAddr::from_str(addr) {
        return Ok(socket_addr);
    }

    // Try using ToSocketAddrs trait
    match addr.to_socket_addrs() {
        Ok(mut addrs) => {
            if let Some(addr) = addrs.next() {
                Ok(addr)
            } else {
                Err(DevproxyError::Config(format!("Failed to parse address: {}", addr)))
            }
        }
        Err(e) => Err(DevproxyError::Config(format!("Failed to parse address {}: {}", addr, e))),
    }
}

/// Normalize a hostname for use as a registry or cache key.
///
/// Lowercases, strips a trailing dot, and converts to Punycode (ASCII) form
/// so that `ÄREN.localhost` and `xn--ren-3qa.localhost` collide correctly.
pub fn normalize_host(host: &str) -> Result<String> {
    let host = host.strip_suffix('.').unwrap_or(host);
    if host.is_empty() {
        return Err(DevproxyError::Config("empty host".to_string()));
    }

    idna::domain_to_ascii(host)
        .map_err(|e| DevproxyError::Config(format!("invalid hostname {}: {:?}", host, e)))
}

/// Strip a trailing `:port` from a Host header value, if present.
///
/// IPv6 literals (`[::1]:8443`) keep their brackets intact.
pub fn strip_port(host_header: &str) -> &str {
    if let Some(bracket_end) = host_header.find(']') {
        return &host_header[..=bracket_end];
    }
    match host_header.rfind(':') {
        Some(idx) => &host_header[..idx],
        None => host_header,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_socket_addr() {
        let addr = parse_socket_addr("127.0.0.1:8080");
        assert!(addr.is_ok(), "Should be able to parse a valid address");

        if let Ok(socket_addr) = addr {
            assert_eq!(socket_addr.port(), 8080);
        }

        let addr = parse_socket_addr("invalid-address");
        assert!(addr.is_err(), "Should fail to parse an invalid address");
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("Web.Localhost.").unwrap(), "web.localhost");
        assert!(normalize_host("").is_err());
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("web.localhost:8443"), "web.localhost");
        assert_eq!(strip_port("web.localhost"), "web.localhost");
        assert_eq!(strip_port("[::1]:8443"), "[::1]");
    }
}
