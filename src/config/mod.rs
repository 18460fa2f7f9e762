//! Configuration module
//!
//! This module handles application configuration: environment variables,
//! configuration files, and the validated defaults used when neither is
//! present. `main.rs` reloads configuration on `SIGHUP` by loading a fresh
//! `AppConfig` and swapping the `Arc` it holds; there is no actor or shared
//! lock in front of it.

mod config;
mod defaults;

pub use config::{AppConfig, DnsConfig, DockerConfig, EntrypointConfig, EntrypointProtocol, LoggingConfig};
pub use defaults::ENV_PREFIX;
