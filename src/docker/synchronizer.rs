//! Route Synchronizer
//!
//! Reconciles Docker container state into [`Registry`] mutations. Runs two
//! long-lived duties concurrently: consuming the live event stream for fast
//! convergence, and a periodic full resync to recover from any event the
//! stream dropped (disconnects, missed notifications during a daemon
//! restart).

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use futures::StreamExt;
use log::{debug, info, warn};

use crate::config::EntrypointConfig;
use crate::registry::{Registry, Route, RouteKey};
use crate::shutdown::Fabric;

use super::client::{ContainerObservation, DockerClient, NetworkAttachment};
use super::labels::ParsedLabels;

const RECONNECT_BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Drives container discovery and keeps the route registry in sync with it
pub struct Synchronizer {
    client: DockerClient,
    registry: Registry,
    label_prefix: String,
    entrypoints: BTreeMap<String, EntrypointConfig>,
    resync_interval: Duration,
    fabric: Fabric,
}

impl Synchronizer {
    pub fn new(
        client: DockerClient,
        registry: Registry,
        label_prefix: String,
        entrypoints: BTreeMap<String, EntrypointConfig>,
        resync_interval: Duration,
        fabric: Fabric,
    ) -> Self {
        Self {
            client,
            registry,
            label_prefix,
            entrypoints,
            resync_interval,
            fabric,
        }
    }

    /// Run the reconciliation loop until shutdown is requested.
    ///
    /// Never returns `Err` on a recoverable Docker error: event-stream
    /// disconnects are retried with exponential backoff, and a resync
    /// recovers from anything genuinely missed in between.
    pub async fn run(mut self) {
        self.resync().await;

        let mut backoff = RECONNECT_BACKOFF_INITIAL;
        let mut resync_tick = tokio::time::interval(self.resync_interval);
        resync_tick.tick().await; // first tick fires immediately; we already resynced above

        loop {
            let mut events = std::pin::pin!(self.client.events());

            loop {
                tokio::select! {
                    _ = self.fabric.cancelled() => {
                        info!("docker synchronizer shutting down");
                        return;
                    }
                    _ = resync_tick.tick() => {
                        self.resync().await;
                    }
                    event = events.next() => {
                        match event {
                            Some(Ok(event)) => {
                                backoff = RECONNECT_BACKOFF_INITIAL;
                                self.handle_event(&event.id).await;
                            }
                            Some(Err(e)) => {
                                warn!("docker event stream error: {}; reconnecting in {:?}", e, backoff);
                                break;
                            }
                            None => {
                                warn!("docker event stream ended; reconnecting in {:?}", backoff);
                                break;
                            }
                        }
                    }
                }
            }

            tokio::select! {
                _ = self.fabric.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
            self.resync().await;
        }
    }

    /// Full reconciliation: list every running container and converge the
    /// registry to exactly what their labels describe, removing routes for
    /// origins that are no longer running.
    async fn resync(&self) {
        let observations = match self.client.list_running().await {
            Ok(observations) => observations,
            Err(e) => {
                warn!("failed to list running containers: {}", e);
                return;
            }
        };

        debug!("resync: {} running container(s)", observations.len());

        let live_origins: std::collections::HashSet<String> =
            observations.iter().map(|o| o.id.clone()).collect();
        for origin in self.registry.origins() {
            if !live_origins.contains(&origin) {
                self.registry.remove_by_origin(&origin);
            }
        }

        for observation in observations {
            self.apply(&observation);
        }
    }

    /// React to a single lifecycle event by re-inspecting (for `start`) or
    /// dropping (for `die`/`stop`/`destroy`) the affected container.
    async fn handle_event(&self, id: &str) {
        match self.client.inspect(id).await {
            Ok(Some(observation)) if observation.state == "running" => {
                self.apply(&observation);
            }
            Ok(_) => {
                self.registry.remove_by_origin(id);
            }
            Err(e) => {
                warn!("failed to inspect container {}: {}", id, e);
            }
        }
    }

    /// Derive the desired routes for one observation and upsert them,
    /// skipping the whole registration on any label error.
    fn apply(&self, observation: &ContainerObservation) {
        let parsed = match ParsedLabels::from_map(&self.label_prefix, &observation.labels) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return,
            Err(e) => {
                warn!("container {}: label parse error: {}", observation.id, e);
                return;
            }
        };

        let Some(ip) = select_backend_ip(&observation.networks) else {
            warn!(
                "container {}: no reachable non-loopback network attachment, skipping",
                observation.id
            );
            return;
        };

        let entrypoint_name = parsed
            .entrypoint
            .as_deref()
            .unwrap_or(if parsed.tls { "https" } else { "http" });
        let Some(entrypoint_config) = self.entrypoints.get(entrypoint_name) else {
            warn!(
                "container {}: unknown entrypoint '{}', skipping",
                observation.id, entrypoint_name
            );
            return;
        };

        let Some(port) = resolve_port(&parsed, entrypoint_config, &observation.exposed_ports) else {
            warn!(
                "container {}: could not determine backend port, skipping",
                observation.id
            );
            return;
        };

        let target = SocketAddr::new(IpAddr::V4(ip), port);

        for host in &parsed.hosts {
            let Ok(key) = RouteKey::new(host) else {
                warn!("container {}: invalid host '{}', skipping", observation.id, host);
                continue;
            };
            self.registry.upsert(Route::new(
                key,
                observation.id.clone(),
                target,
                entrypoint_name.to_string(),
                parsed.tls,
            ));
        }
    }
}

/// Prefer an attachment with a non-empty, non-loopback IPv4 address. The
/// first such attachment wins — compose's default project network is
/// typically the only one present, and multi-network disambiguation beyond
/// "first reachable" is left to the operator via network pruning.
fn select_backend_ip(networks: &[NetworkAttachment]) -> Option<std::net::Ipv4Addr> {
    networks
        .iter()
        .filter_map(|n| n.ipv4)
        .find(|ip| !ip.is_loopback() && !ip.is_unspecified())
}

/// Resolve the backend port per spec.md §4.2: an explicit `port` label wins;
/// otherwise a TCP entrypoint falls back to its configured `target_port`;
/// otherwise a single exposed port is auto-detected, and an ambiguous set
/// (zero or more than one) is a skip.
fn resolve_port(parsed: &ParsedLabels, entrypoint: &EntrypointConfig, exposed_ports: &[u16]) -> Option<u16> {
    if let Some(port) = parsed.port {
        return Some(port);
    }
    if let Some(port) = entrypoint.target_port {
        return Some(port);
    }
    match exposed_ports {
        [single] => Some(*single),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_select_backend_ip_skips_loopback() {
        let networks = vec![
            NetworkAttachment { network: "host".to_string(), ipv4: Some(Ipv4Addr::LOCALHOST) },
            NetworkAttachment { network: "bridge".to_string(), ipv4: Some(Ipv4Addr::new(172, 18, 0, 2)) },
        ];
        assert_eq!(select_backend_ip(&networks), Some(Ipv4Addr::new(172, 18, 0, 2)));
    }

    #[test]
    fn test_select_backend_ip_none_when_unreachable() {
        let networks = vec![NetworkAttachment { network: "none".to_string(), ipv4: None }];
        assert_eq!(select_backend_ip(&networks), None);
    }

    fn labels(port: Option<u16>) -> ParsedLabels {
        ParsedLabels {
            hosts: vec!["app.localhost".to_string()],
            port,
            tls: true,
            entrypoint: None,
        }
    }

    fn tcp_entrypoint(target_port: Option<u16>) -> EntrypointConfig {
        EntrypointConfig {
            protocol: crate::config::EntrypointProtocol::Tcp,
            listen: "127.0.0.1:15432".parse().unwrap(),
            target_port,
            sniff_postgres: true,
        }
    }

    #[test]
    fn test_resolve_port_label_wins() {
        let entrypoint = tcp_entrypoint(Some(5432));
        assert_eq!(resolve_port(&labels(Some(9999)), &entrypoint, &[80]), Some(9999));
    }

    #[test]
    fn test_resolve_port_falls_back_to_entrypoint_default() {
        let entrypoint = tcp_entrypoint(Some(5432));
        assert_eq!(resolve_port(&labels(None), &entrypoint, &[]), Some(5432));
    }

    #[test]
    fn test_resolve_port_auto_detects_single_exposed() {
        let entrypoint = tcp_entrypoint(None);
        assert_eq!(resolve_port(&labels(None), &entrypoint, &[8080]), Some(8080));
    }

    #[test]
    fn test_resolve_port_ambiguous_is_none() {
        let entrypoint = tcp_entrypoint(None);
        assert_eq!(resolve_port(&labels(None), &entrypoint, &[8080, 8443]), None);
    }
}
