//! Route data model

use std::net::SocketAddr;

use crate::common::net::normalize_host;
use crate::common::Result;

/// Normalized, Punycode-encoded hostname used as the registry's primary key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteKey(String);

impl RouteKey {
    /// Build a route key from a raw hostname, normalizing it first
    pub fn new(host: &str) -> Result<Self> {
        normalize_host(host).map(RouteKey)
    }

    /// The normalized hostname
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single host -> backend routing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Normalized hostname this route answers for
    pub host: RouteKey,
    /// Container (or other runtime resource) id this route originated from.
    /// Used to remove every route a container contributed when it stops.
    pub origin: String,
    /// Backend address traffic is forwarded to
    pub target: SocketAddr,
    /// Name of the entrypoint (from config) this route is reachable on
    pub entrypoint: String,
    /// Whether this route is reached over TLS. `false` (from a container's
    /// `<prefix>.tls=false` label) downgrades the route to a plain
    /// HTTP-over-HTTP passthrough instead of HTTPS termination.
    pub tls: bool,
}

impl Route {
    /// Create a new route
    pub fn new(host: RouteKey, origin: impl Into<String>, target: SocketAddr, entrypoint: impl Into<String>, tls: bool) -> Self {
        Self {
            host,
            origin: origin.into(),
            target,
            entrypoint: entrypoint.into(),
            tls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_key_normalizes() {
        let a = RouteKey::new("Web.Localhost.").unwrap();
        let b = RouteKey::new("web.localhost").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_route_key_rejects_empty() {
        assert!(RouteKey::new("").is_err());
    }
}
