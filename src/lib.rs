//! devproxy: a local reverse proxy for container-based development
//!
//! Watches the Docker daemon for containers carrying routing labels, keeps
//! an in-memory route registry in sync with what's running, and terminates
//! HTTP, HTTPS (issuing certificates from a local CA on demand), and raw TCP
//! traffic for the hostnames those containers claim. A small DNS server
//! resolves those hostnames to the proxy itself so nothing outside the
//! machine needs to be reconfigured.
//!
//! # Modules
//!
//! - [`ca`] — the local certificate authority roots devproxy's leaf certs in
//! - [`certmgr`] — issues and caches per-host leaf certificates
//! - [`common`] — shared error type, logging setup, net and filesystem helpers
//! - [`config`] — application configuration and the reload actor
//! - [`docker`] — Docker daemon client and the label-to-route synchronizer
//! - [`dns`] — the local recursive DNS server
//! - [`entrypoints`] — the HTTP, HTTPS, and TCP listeners
//! - [`protocol`] — byte-level TLS/ClientHello/PostgreSQL sniffing
//! - [`registry`] — the shared, concurrent route table
//! - [`shutdown`] — the cooperative shutdown/reload fabric
//! - [`tls`] — per-connection `SslAcceptor`/`Ssl` construction

pub mod ca;
pub mod certmgr;
pub mod common;
pub mod config;
pub mod docker;
pub mod dns;
pub mod entrypoints;
pub mod protocol;
pub mod registry;
pub mod shutdown;
pub mod tls;

pub use common::{DevproxyError, Result};

/// Application name, used for the default log filter prefix and the CLI banner
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
