//! Simulates what the synchronizer does with a container's labels: parse
//! them, build routes, and keep the registry in sync as containers come and
//! go — without needing an actual Docker daemon.

use std::collections::HashMap;
use std::net::SocketAddr;

use devproxy::docker::{LabelError, ParsedLabels};
use devproxy::registry::{Registry, Route, RouteKey};

fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn register_container(registry: &Registry, container_id: &str, parsed: &ParsedLabels, entrypoint: &str, backend: SocketAddr) {
    for host in &parsed.hosts {
        let key = RouteKey::new(host).unwrap();
        registry.upsert(Route::new(key, container_id, backend, entrypoint, true));
    }
}

#[test]
fn test_multi_host_container_registers_every_host() {
    let container_labels = labels(&[
        ("devproxy.enable", "true"),
        ("devproxy.host", "app.localhost, app.test"),
    ]);
    let parsed = ParsedLabels::from_map("devproxy", &container_labels).unwrap().unwrap();

    let registry = Registry::new();
    let backend: SocketAddr = "172.18.0.2:3000".parse().unwrap();
    register_container(&registry, "container-a", &parsed, "https", backend);

    assert_eq!(
        registry.lookup(&RouteKey::new("app.localhost").unwrap(), "https").unwrap().target,
        backend
    );
    assert_eq!(
        registry.lookup(&RouteKey::new("app.test").unwrap(), "https").unwrap().target,
        backend
    );
}

#[test]
fn test_container_stop_removes_only_its_own_routes() {
    let registry = Registry::new();
    let backend: SocketAddr = "172.18.0.2:3000".parse().unwrap();

    let app_a = ParsedLabels::from_map("devproxy", &labels(&[("devproxy.enable", "true"), ("devproxy.host", "a.localhost")]))
        .unwrap()
        .unwrap();
    let app_b = ParsedLabels::from_map("devproxy", &labels(&[("devproxy.enable", "true"), ("devproxy.host", "b.localhost")]))
        .unwrap()
        .unwrap();

    register_container(&registry, "container-a", &app_a, "https", backend);
    register_container(&registry, "container-b", &app_b, "https", backend);

    registry.remove_by_origin("container-a");

    assert!(registry.lookup(&RouteKey::new("a.localhost").unwrap(), "https").is_none());
    assert!(registry.lookup(&RouteKey::new("b.localhost").unwrap(), "https").is_some());
}

#[test]
fn test_entrypoint_label_routes_through_named_tcp_entrypoint_not_https() {
    let container_labels = labels(&[
        ("devproxy.enable", "true"),
        ("devproxy.host", "db.localhost"),
        ("devproxy.tls", "false"),
        ("devproxy.entrypoint", "postgres"),
    ]);
    let parsed = ParsedLabels::from_map("devproxy", &container_labels).unwrap().unwrap();
    assert_eq!(parsed.entrypoint.as_deref(), Some("postgres"));

    let registry = Registry::new();
    let backend: SocketAddr = "172.18.0.3:5432".parse().unwrap();
    register_container(&registry, "container-db", &parsed, "postgres", backend);

    let host = RouteKey::new("db.localhost").unwrap();
    assert!(registry.lookup(&host, "postgres").is_some());
    assert!(registry.lookup(&host, "https").is_none());
}

#[test]
fn test_malformed_port_label_is_rejected_before_touching_registry() {
    let container_labels = labels(&[
        ("devproxy.enable", "true"),
        ("devproxy.host", "app.localhost"),
        ("devproxy.port", "not-a-port"),
    ]);

    let result = ParsedLabels::from_map("devproxy", &container_labels);
    assert!(matches!(result, Err(LabelError::InvalidPort(_))));
}
