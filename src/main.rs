//! devproxy daemon entrypoint
//!
//! Wires configuration, the local CA and certificate manager, the route
//! registry, the Docker synchronizer, every configured entrypoint, and the
//! DNS server together, then waits for `SIGTERM`/`SIGINT` (graceful
//! shutdown) or `SIGHUP` (partial config reload).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{debug, info, warn};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;

use devproxy::ca::CertificateAuthority;
use devproxy::certmgr::CertificateManager;
use devproxy::common::{init_logger, Result};
use devproxy::config::{AppConfig, EntrypointProtocol};
use devproxy::docker::{DockerClient, Synchronizer};
use devproxy::dns::{DnsReloadHandle, DnsServer};
use devproxy::entrypoints::{HttpEntrypoint, HttpsEntrypoint, TcpEntrypoint};
use devproxy::registry::Registry;
use devproxy::shutdown::Fabric;
use devproxy::tls::build_base_acceptor;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "devproxy", about = "Local development reverse proxy: container labels to live TLS/TCP routes")]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(long, env = "DEVPROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the data directory (CA, certs, etc.)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::auto_load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(log_level) = cli.log_level {
        config.logging.level = log_level;
    }
    config.validate()?;

    init_logger(&config.logging.level);
    for warning in config.check() {
        warn!("{}", warning);
    }

    let config = Arc::new(config);
    info!("starting devproxy, data dir {}", config.data_dir.display());

    let ca = CertificateAuthority::load_or_generate(&config.ca_cert_path(), &config.ca_key_path())?;
    let certs = Arc::new(CertificateManager::new(
        Arc::new(ca),
        config.certs_dir(),
        config.leaf_validity_days,
        config.renewal_threshold_days,
    ));
    let acceptor = Arc::new(build_base_acceptor()?);

    let registry = Registry::new();
    let fabric = Fabric::new();
    let mut tasks = JoinSet::new();

    // Registered first so it runs last (LIFO): every entrypoint's hook below
    // releases its listener before the registry they all read from is wiped.
    let shutdown_registry = registry.clone();
    fabric.on_shutdown(move || {
        debug!("shutdown: clearing route registry");
        shutdown_registry.clear();
    });

    let docker_client = DockerClient::connect(config.docker.socket.as_deref())?;
    let synchronizer = Synchronizer::new(
        docker_client,
        registry.clone(),
        config.docker.label_prefix.clone(),
        config.entrypoints.clone(),
        Duration::from_secs(config.docker.resync_interval_secs),
        fabric.clone(),
    );
    tasks.spawn(synchronizer.run());

    let https_port = config
        .entrypoints
        .values()
        .find(|e| e.protocol == EntrypointProtocol::Https)
        .map(|e| e.listen.port())
        .unwrap_or(443);

    for (name, entrypoint) in config.entrypoints.iter() {
        match entrypoint.protocol {
            EntrypointProtocol::Http => {
                let ep = HttpEntrypoint::new(name.clone(), entrypoint.listen, https_port, registry.clone(), fabric.clone());
                let hook_name = name.clone();
                fabric.on_shutdown(move || debug!("shutdown: releasing http entrypoint '{}'", hook_name));
                tasks.spawn(async move {
                    if let Err(e) = ep.run().await {
                        warn!("http entrypoint '{}' failed: {}", name, e);
                    }
                });
            }
            EntrypointProtocol::Https => {
                let ep = HttpsEntrypoint::new(
                    name.clone(),
                    entrypoint.listen,
                    registry.clone(),
                    Arc::clone(&certs),
                    Arc::clone(&acceptor),
                    fabric.clone(),
                );
                let hook_name = name.clone();
                fabric.on_shutdown(move || debug!("shutdown: releasing https entrypoint '{}'", hook_name));
                tasks.spawn(async move {
                    if let Err(e) = ep.run().await {
                        warn!("https entrypoint '{}' failed: {}", name, e);
                    }
                });
            }
            EntrypointProtocol::Tcp => {
                let ep = TcpEntrypoint::new(
                    name.clone(),
                    entrypoint.listen,
                    entrypoint.sniff_postgres,
                    config.sniff_buffer_bytes,
                    Duration::from_secs(config.sniff_timeout_secs),
                    registry.clone(),
                    fabric.clone(),
                );
                let hook_name = name.clone();
                fabric.on_shutdown(move || debug!("shutdown: releasing tcp entrypoint '{}'", hook_name));
                tasks.spawn(async move {
                    if let Err(e) = ep.run().await {
                        warn!("tcp entrypoint '{}' failed: {}", name, e);
                    }
                });
            }
        }
    }

    let dns = DnsServer::new(config.dns.listen, config.dns.suffixes.clone(), config.dns.upstream, fabric.clone());
    let dns_reload = dns.reload_handle();
    fabric.on_shutdown(|| debug!("shutdown: releasing dns server"));
    tasks.spawn(async move {
        if let Err(e) = dns.run().await {
            warn!("dns server failed: {}", e);
        }
    });

    run_signal_loop(&fabric, dns_reload, config.clone()).await;

    Fabric::wait_for_tasks(&mut tasks, SHUTDOWN_GRACE).await;
    info!("devproxy stopped");
    Ok(())
}

/// Await `SIGTERM`/`SIGINT` (trigger shutdown and return) or `SIGHUP`
/// (reload what can be safely applied live, warn about the rest) in a loop.
async fn run_signal_loop(fabric: &Fabric, dns: DnsReloadHandle, mut current: Arc<AppConfig>) {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                fabric.trigger();
                return;
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
                fabric.trigger();
                return;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reloading configuration");
                if let Some(reloaded) = reload_config(&current, &dns).await {
                    current = Arc::new(reloaded);
                }
            }
        }
    }
}

/// Reload whatever the running process can safely change without a restart:
/// DNS suffixes/upstream and the log level. Listen addresses, the Docker
/// socket, and the synchronizer's label prefix require re-binding sockets or
/// rebuilding long-lived tasks this process doesn't currently support
/// swapping in place, so those are flagged instead of silently ignored.
/// Returns the reloaded config so the caller can compare against it next time.
async fn reload_config(previous: &AppConfig, dns: &DnsReloadHandle) -> Option<AppConfig> {
    let reloaded = match AppConfig::auto_load(None) {
        Ok(reloaded) => reloaded,
        Err(e) => {
            warn!("failed to reload configuration: {}", e);
            return None;
        }
    };

    if let Ok(level) = reloaded.logging.level.parse::<log::LevelFilter>() {
        log::set_max_level(level);
        info!("log level reloaded to {}", level);
    }

    if reloaded.dns.suffixes != previous.dns.suffixes || reloaded.dns.upstream != previous.dns.upstream {
        dns.reconfigure(reloaded.dns.suffixes.clone(), reloaded.dns.upstream);
        info!("dns suffixes/upstream reloaded");
    }

    if reloaded.entrypoints != previous.entrypoints {
        warn!("entrypoint listen address changes require a restart; ignoring");
    }
    if reloaded.docker.socket != previous.docker.socket {
        warn!("docker socket changes require a restart; ignoring");
    }
    if reloaded.docker.label_prefix != previous.docker.label_prefix {
        warn!("label prefix changes require a restart; ignoring");
    }

    Some(reloaded)
}
