//! Configuration structures and methods
//!
//! This module defines the application configuration structure and the
//! methods used to load it from different sources (command-line arguments,
//! environment variables, and configuration files).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::common::{check_file_exists, DevproxyError, Result};
use crate::config::defaults;

/// Protocol an entrypoint terminates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EntrypointProtocol {
    /// Plain HTTP, redirected to the matching HTTPS entrypoint
    Http,
    /// TLS-terminating HTTP reverse proxy with WebSocket upgrade support
    Https,
    /// Raw TCP passthrough with SNI (and optional PostgreSQL) sniffing
    Tcp,
}

impl fmt::Display for EntrypointProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntrypointProtocol::Http => write!(f, "http"),
            EntrypointProtocol::Https => write!(f, "https"),
            EntrypointProtocol::Tcp => write!(f, "tcp"),
        }
    }
}

/// A single listening entrypoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EntrypointConfig {
    /// Protocol this entrypoint terminates
    pub protocol: EntrypointProtocol,
    /// Address to bind and listen on
    pub listen: SocketAddr,
    /// Default backend port for routes reached through this entrypoint,
    /// used when a container's `port` label is absent. Only meaningful for
    /// [`EntrypointProtocol::Tcp`] entrypoints; `http`/`https` derive the
    /// backend port from the container's exposed ports instead.
    pub target_port: Option<u16>,
    /// Whether this TCP entrypoint should sniff for a PostgreSQL
    /// `SSLRequest` preamble before falling back to ClientHello SNI sniffing
    pub sniff_postgres: bool,
}

impl Default for EntrypointConfig {
    fn default() -> Self {
        Self {
            protocol: EntrypointProtocol::Tcp,
            listen: defaults::http_listen(),
            target_port: None,
            sniff_postgres: false,
        }
    }
}

/// Docker runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DockerConfig {
    /// Docker daemon socket (`None` uses the platform default, e.g. `unix:///var/run/docker.sock`)
    pub socket: Option<String>,
    /// Label prefix recognized on containers (e.g. `devproxy` matches `devproxy.host`)
    pub label_prefix: String,
    /// Interval between full container-list resyncs, used to recover from a missed event
    pub resync_interval_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: defaults::docker_socket(),
            label_prefix: defaults::label_prefix(),
            resync_interval_secs: defaults::resync_interval_secs(),
        }
    }
}

/// Local DNS server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DnsConfig {
    /// Address the DNS server listens on (UDP and TCP)
    pub listen: SocketAddr,
    /// Upstream resolver used for queries outside `suffixes`
    pub upstream: SocketAddr,
    /// Domain suffixes this server answers authoritatively, from the route registry
    pub suffixes: Vec<String>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            listen: defaults::dns_listen(),
            upstream: defaults::dns_upstream(),
            suffixes: defaults::dns_suffixes(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

fn default_entrypoints() -> BTreeMap<String, EntrypointConfig> {
    let mut map = BTreeMap::new();
    map.insert(
        "http".to_string(),
        EntrypointConfig {
            protocol: EntrypointProtocol::Http,
            listen: defaults::http_listen(),
            target_port: None,
            sniff_postgres: false,
        },
    );
    map.insert(
        "https".to_string(),
        EntrypointConfig {
            protocol: EntrypointProtocol::Https,
            listen: defaults::https_listen(),
            target_port: None,
            sniff_postgres: false,
        },
    );
    map
}

/// Application configuration
///
/// Contains all configuration options needed to run devproxy. Supports
/// loading from command-line arguments, environment variables, and a
/// configuration file, merged in that order of increasing precedence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the CA key/cert and issued leaf material
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,

    /// Named entrypoints. `http` and `https` are always present; additional
    /// entries are generic TCP entrypoints selected via the `entrypoint` label.
    #[serde(default = "default_entrypoints")]
    pub entrypoints: BTreeMap<String, EntrypointConfig>,

    /// Docker runtime configuration
    pub docker: DockerConfig,

    /// Local DNS server configuration
    pub dns: DnsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Validity period assigned to newly issued leaf certificates, in days
    #[serde(default = "defaults::leaf_validity_days")]
    pub leaf_validity_days: u32,

    /// Leaves are reissued once fewer than this many days remain before expiry
    #[serde(default = "defaults::renewal_threshold_days")]
    pub renewal_threshold_days: u32,

    /// Maximum bytes the TCP entrypoint buffers while sniffing a connection
    #[serde(default = "defaults::sniff_buffer_bytes")]
    pub sniff_buffer_bytes: usize,

    /// Maximum time the TCP entrypoint waits to collect enough bytes to classify a connection
    #[serde(default = "defaults::sniff_timeout_secs")]
    pub sniff_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: defaults::data_dir(),
            entrypoints: default_entrypoints(),
            docker: DockerConfig::default(),
            dns: DnsConfig::default(),
            logging: LoggingConfig::default(),
            leaf_validity_days: defaults::leaf_validity_days(),
            renewal_threshold_days: defaults::renewal_threshold_days(),
            sniff_buffer_bytes: defaults::sniff_buffer_bytes(),
            sniff_timeout_secs: defaults::sniff_timeout_secs(),
        }
    }
}

impl AsRef<AppConfig> for AppConfig {
    fn as_ref(&self) -> &AppConfig {
        self
    }
}

impl AppConfig {
    /// CA certificate path derived from `data_dir`
    pub fn ca_cert_path(&self) -> PathBuf {
        self.data_dir.join("ca").join("ca.crt")
    }

    /// CA private key path derived from `data_dir`
    pub fn ca_key_path(&self) -> PathBuf {
        self.data_dir.join("ca").join("ca.key")
    }

    /// Directory issued leaf certificates and keys are materialized under
    pub fn certs_dir(&self) -> PathBuf {
        self.data_dir.join("certs")
    }

    /// Look up an entrypoint by name
    pub fn entrypoint(&self, name: &str) -> Option<&EntrypointConfig> {
        self.entrypoints.get(name)
    }

    /// Auto-detect and load configuration from the best available source
    ///
    /// Loads, in increasing order of precedence: built-in defaults, a
    /// configuration file (if present), then environment variables.
    pub fn auto_load(config_path: Option<&Path>) -> Result<Self> {
        use log::{debug, info};

        let mut config = Self::default();
        debug!("starting from default configuration");

        let file_path = config_path
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(defaults::DEFAULT_CONFIG_FILE));

        if file_path.exists() {
            info!("loading configuration from {}", file_path.display());
            match Self::from_file(&file_path) {
                Ok(file_config) => {
                    config = config.merge(file_config);
                    debug!("merged configuration file");
                }
                Err(e) => {
                    log::warn!("failed to load configuration file {}: {}", file_path.display(), e);
                }
            }
        } else {
            debug!("no configuration file found at {}", file_path.display());
        }

        match Self::from_env() {
            Ok(env_config) if env_config != Self::default() => {
                info!("applying configuration from environment variables");
                config = config.merge(env_config);
            }
            Ok(_) => debug!("no configuration found in environment variables"),
            Err(e) => log::warn!("failed to load configuration from environment: {}", e),
        }

        Ok(config)
    }

    /// Load configuration overrides from environment variables
    ///
    /// Variables are prefixed with [`defaults::ENV_PREFIX`], e.g.
    /// `DEVPROXY_DATA_DIR`, `DEVPROXY_DNS_LISTEN`, `DEVPROXY_LOG_LEVEL`.
    pub fn from_env() -> Result<Self> {
        use crate::common::net::parse_socket_addr;
        use std::env;

        let get_env = |name: &str| -> Option<String> {
            env::var(format!("{}{}", defaults::ENV_PREFIX, name)).ok()
        };

        let mut config = Self::default();

        if let Some(dir) = get_env("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(listen) = get_env("DNS_LISTEN") {
            config.dns.listen = parse_socket_addr(&listen)?;
        }
        if let Some(upstream) = get_env("DNS_UPSTREAM") {
            config.dns.upstream = parse_socket_addr(&upstream)?;
        }
        if let Some(suffixes) = get_env("DNS_SUFFIXES") {
            config.dns.suffixes = suffixes.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(socket) = get_env("DOCKER_SOCKET") {
            config.docker.socket = Some(socket);
        }
        if let Some(prefix) = get_env("LABEL_PREFIX") {
            config.docker.label_prefix = prefix;
        }
        if let Some(level) = get_env("LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    /// Merge another configuration into this one
    ///
    /// Every field in `other` takes precedence. Used to implement the
    /// defaults -> file -> environment priority chain.
    pub fn merge(&self, other: impl AsRef<Self>) -> Self {
        other.as_ref().clone()
    }

    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            DevproxyError::Config(format!(
                "failed to read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            DevproxyError::Config(format!(
                "failed to parse configuration file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| DevproxyError::Config(format!("failed to serialize configuration: {}", e)))?;

        fs::write(path, content).map_err(DevproxyError::Io)
    }

    /// Validate configuration invariants that can be checked without touching the network
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(DevproxyError::Config(format!(
                    "invalid log level: {}. valid values are: trace, debug, info, warn, error",
                    other
                )))
            }
        }

        if self.entrypoints.is_empty() {
            return Err(DevproxyError::Config("at least one entrypoint must be configured".to_string()));
        }

        if !self.entrypoints.values().any(|e| e.protocol == EntrypointProtocol::Https) {
            return Err(DevproxyError::Config(
                "configuration must define at least one https entrypoint".to_string(),
            ));
        }

        if self.renewal_threshold_days >= self.leaf_validity_days {
            return Err(DevproxyError::Config(format!(
                "renewal_threshold_days ({}) must be smaller than leaf_validity_days ({})",
                self.renewal_threshold_days, self.leaf_validity_days
            )));
        }

        Ok(())
    }

    /// Check configuration for potential issues without failing
    ///
    /// Unlike [`Self::validate`], this never returns an error; it surfaces
    /// warnings the caller may choose to log.
    pub fn check(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if check_file_exists(&self.ca_cert_path()).is_err() {
            warnings.push(format!(
                "CA certificate not yet materialized at {}; one will be generated on startup",
                self.ca_cert_path().display()
            ));
        }

        if self.dns.suffixes.is_empty() {
            warnings.push("no DNS suffixes configured; the DNS server will only forward".to_string());
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default() {
        let config = AppConfig::default();
        assert_eq!(config.entrypoints.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_overrides_wholesale() {
        let base = AppConfig::default();
        let mut override_config = AppConfig::default();
        override_config.logging.level = "debug".to_string();
        override_config.data_dir = PathBuf::from("/tmp/devproxy-test");

        let merged = base.merge(override_config.clone());
        assert_eq!(merged, override_config);
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_https_entrypoint() {
        let mut config = AppConfig::default();
        config.entrypoints.clear();
        config.entrypoints.insert(
            "http".to_string(),
            EntrypointConfig {
                protocol: EntrypointProtocol::Http,
                listen: defaults::http_listen(),
                target_port: None,
                sniff_postgres: false,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env() {
        env::set_var("DEVPROXY_DATA_DIR", "/tmp/devproxy-env-test");
        env::set_var("DEVPROXY_LOG_LEVEL", "debug");
        env::set_var("DEVPROXY_DNS_SUFFIXES", "localhost, internal");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/devproxy-env-test"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.dns.suffixes, vec!["localhost".to_string(), "internal".to_string()]);

        env::remove_var("DEVPROXY_DATA_DIR");
        env::remove_var("DEVPROXY_LOG_LEVEL");
        env::remove_var("DEVPROXY_DNS_SUFFIXES");
    }
}
