//! Default configuration values
//!
//! This module centralizes all default configuration values in one place.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Environment variable prefix for all configuration options
pub const ENV_PREFIX: &str = "DEVPROXY_";

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "devproxy.json";

/// Default HTTP (redirect) listen address
pub fn http_listen() -> SocketAddr {
    SocketAddr::from_str("0.0.0.0:80").expect("default http listen address is valid")
}

/// Default HTTPS listen address
pub fn https_listen() -> SocketAddr {
    SocketAddr::from_str("0.0.0.0:443").expect("default https listen address is valid")
}

/// Default DNS server listen address
pub fn dns_listen() -> SocketAddr {
    SocketAddr::from_str("127.0.0.1:53").expect("default dns listen address is valid")
}

/// Default upstream resolver used for non-authoritative DNS queries
pub fn dns_upstream() -> SocketAddr {
    SocketAddr::from_str("1.1.1.1:53").expect("default dns upstream address is valid")
}

/// Default suffix the DNS server answers authoritatively for
pub fn dns_suffixes() -> Vec<String> {
    vec!["localhost".to_string(), "test".to_string()]
}

/// Default data directory, where the CA and issued leaf certificates live
pub fn data_dir() -> PathBuf {
    PathBuf::from("./.devproxy")
}

/// Default label prefix used to recognize devproxy labels on containers
pub fn label_prefix() -> String {
    "devproxy".to_string()
}

/// Default Docker daemon connection
pub fn docker_socket() -> Option<String> {
    None
}

/// Default interval between full reconciliation resyncs, in seconds
pub fn resync_interval_secs() -> u64 {
    30
}

/// Default log level
pub fn log_level() -> String {
    "info".to_string()
}

/// Default leaf certificate validity, in days
pub fn leaf_validity_days() -> u32 {
    825
}

/// Default renewal threshold: leaves are reissued once fewer than this many days remain
pub fn renewal_threshold_days() -> u32 {
    30
}

/// Default protocol-detection buffer ceiling for the TCP entrypoint, in bytes
pub fn sniff_buffer_bytes() -> usize {
    4096
}

/// Default deadline for the TCP entrypoint to collect enough bytes to classify a connection
pub fn sniff_timeout_secs() -> u64 {
    5
}
