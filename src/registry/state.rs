//! Registry storage and change notification

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use super::route::{Route, RouteKey};

/// Kind of change a [`RegistryEvent`] describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEventKind {
    /// A route was added or replaced an existing route for the same host
    Added,
    /// A route was removed
    Removed,
}

/// A single registry change, delivered to subscribers outside the write lock
#[derive(Debug, Clone)]
pub struct RegistryEvent {
    /// Monotonically increasing sequence number, useful for detecting missed events
    pub seq: u64,
    /// What happened
    pub kind: RegistryEventKind,
    /// The route that was added or removed
    pub route: Route,
}

type Subscriber = Box<dyn Fn(&RegistryEvent) + Send + Sync>;

/// Routes are unique per (host, entrypoint): the same hostname may be routed
/// differently on the HTTPS entrypoint than on a named TCP entrypoint.
type HostKey = (RouteKey, String);

struct RegistryState {
    by_host: HashMap<HostKey, Route>,
    by_origin: HashMap<String, HashSet<HostKey>>,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            by_host: HashMap::new(),
            by_origin: HashMap::new(),
        }
    }
}

/// The route registry
///
/// Cheap to clone; internally an `Arc`. Hosts are looked up with exact match
/// first, then a single-label wildcard fallback (`foo.web.localhost` falls
/// back to `*.web.localhost`), matching how the certificate manager issues
/// wildcard SANs.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RwLock<RegistryState>>,
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    seq: Arc<AtomicU64>,
}

impl Registry {
    /// Create a new, empty registry
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryState::new())),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Insert or replace the route for `route.host`
    ///
    /// Idempotent: re-upserting an identical route from the same origin is a
    /// no-op and does not emit an event. Re-registering a still-live host key
    /// from a *different* origin is rejected outright — the prior owner must
    /// be removed (e.g. via [`Self::remove_by_origin`] on its container
    /// stopping) before a new origin can claim the same `(host, entrypoint)`.
    pub fn upsert(&self, route: Route) {
        let key: HostKey = (route.host.clone(), route.entrypoint.clone());
        let event = {
            let mut state = self.inner.write();

            if let Some(existing) = state.by_host.get(&key) {
                if existing == &route {
                    return;
                }
                if existing.origin != route.origin {
                    debug!(
                        "registry: rejecting takeover of {} by origin {} (still owned by {})",
                        route.host, route.origin, existing.origin
                    );
                    return;
                }
            }

            state
                .by_origin
                .entry(route.origin.clone())
                .or_default()
                .insert(key.clone());
            state.by_host.insert(key, route.clone());

            RegistryEvent {
                seq: self.seq.fetch_add(1, Ordering::SeqCst),
                kind: RegistryEventKind::Added,
                route,
            }
        };

        debug!("registry: added route {} -> {}", event.route.host, event.route.target);
        self.notify(&event);
    }

    /// Remove a single `(host, entrypoint)` route, if present
    pub fn remove(&self, host: &RouteKey, entrypoint: &str) {
        let key: HostKey = (host.clone(), entrypoint.to_string());
        let event = {
            let mut state = self.inner.write();
            let Some(route) = state.by_host.remove(&key) else {
                return;
            };
            if let Some(hosts) = state.by_origin.get_mut(&route.origin) {
                hosts.remove(&key);
                if hosts.is_empty() {
                    state.by_origin.remove(&route.origin);
                }
            }

            RegistryEvent {
                seq: self.seq.fetch_add(1, Ordering::SeqCst),
                kind: RegistryEventKind::Removed,
                route,
            }
        };

        debug!("registry: removed route {}", event.route.host);
        self.notify(&event);
    }

    /// Remove every route contributed by `origin` (e.g. a stopped container)
    pub fn remove_by_origin(&self, origin: &str) {
        let events = {
            let mut state = self.inner.write();
            let Some(hosts) = state.by_origin.remove(origin) else {
                return;
            };

            let mut events = Vec::with_capacity(hosts.len());
            for key in hosts {
                if let Some(route) = state.by_host.remove(&key) {
                    events.push(RegistryEvent {
                        seq: self.seq.fetch_add(1, Ordering::SeqCst),
                        kind: RegistryEventKind::Removed,
                        route,
                    });
                }
            }
            events
        };

        for event in &events {
            debug!("registry: removed route {} (origin {} gone)", event.route.host, origin);
            self.notify(event);
        }
    }

    /// Look up the route for `host` on the given `entrypoint`, falling back to
    /// a wildcard match one label up (`a.b.localhost` -> `*.b.localhost`) if
    /// there is no exact match. A wildcard entry never shadows a more
    /// specific literal: the exact lookup always runs first.
    pub fn lookup(&self, host: &RouteKey, entrypoint: &str) -> Option<Route> {
        let state = self.inner.read();
        if let Some(route) = state.by_host.get(&(host.clone(), entrypoint.to_string())) {
            return Some(route.clone());
        }

        let wildcard = wildcard_of(host.as_str())?;
        let wildcard_key = (RouteKey::new(&wildcard).ok()?, entrypoint.to_string());
        state.by_host.get(&wildcard_key).cloned()
    }

    /// A snapshot of every currently registered route
    pub fn snapshot(&self) -> Vec<Route> {
        self.inner.read().by_host.values().cloned().collect()
    }

    /// Every distinct hostname currently registered, used to tell the DNS
    /// server which names it is authoritative for.
    pub fn hosts(&self) -> Vec<String> {
        self.inner
            .read()
            .by_host
            .keys()
            .map(|(host, _)| host.as_str().to_string())
            .collect()
    }

    /// Every distinct origin currently contributing at least one route, used
    /// by the synchronizer's resync pass to drop origins that disappeared
    /// without a corresponding lifecycle event.
    pub fn origins(&self) -> Vec<String> {
        self.inner.read().by_origin.keys().cloned().collect()
    }

    /// Drop every registered route without emitting individual removal
    /// events. Used on shutdown to release the registry's state ahead of
    /// process exit rather than leaving it to `Drop`.
    pub fn clear(&self) {
        let mut state = self.inner.write();
        state.by_host.clear();
        state.by_origin.clear();
    }

    /// Register a callback invoked, outside any lock, for every future change
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        self.subscribers.write().push(Box::new(callback));
    }

    fn notify(&self, event: &RegistryEvent) {
        let subscribers = self.subscribers.read();
        for subscriber in subscribers.iter() {
            subscriber(event);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn wildcard_of(host: &str) -> Option<String> {
    let (_, rest) = host.split_once('.')?;
    if rest.is_empty() {
        return None;
    }
    Some(format!("*.{}", rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicUsize;

    fn target() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    #[test]
    fn test_upsert_and_lookup() {
        let registry = Registry::new();
        let host = RouteKey::new("app.localhost").unwrap();
        registry.upsert(Route::new(host.clone(), "container-1", target(), "https", true));

        let found = registry.lookup(&host, "https").unwrap();
        assert_eq!(found.target, target());
    }

    #[test]
    fn test_lookup_misses_on_different_entrypoint() {
        let registry = Registry::new();
        let host = RouteKey::new("app.localhost").unwrap();
        registry.upsert(Route::new(host.clone(), "container-1", target(), "https", true));

        assert!(registry.lookup(&host, "postgres").is_none());
    }

    #[test]
    fn test_wildcard_fallback() {
        let registry = Registry::new();
        let wildcard = RouteKey::new("*.apps.localhost").unwrap();
        registry.upsert(Route::new(wildcard, "container-1", target(), "https", true));

        let lookup_host = RouteKey::new("foo.apps.localhost").unwrap();
        assert!(registry.lookup(&lookup_host, "https").is_some());
    }

    #[test]
    fn test_literal_wins_over_wildcard() {
        let registry = Registry::new();
        let wildcard = RouteKey::new("*.apps.localhost").unwrap();
        let literal_target: SocketAddr = "127.0.0.1:9090".parse().unwrap();
        let literal = RouteKey::new("foo.apps.localhost").unwrap();
        registry.upsert(Route::new(wildcard, "container-1", target(), "https", true));
        registry.upsert(Route::new(literal.clone(), "container-2", literal_target, "https", true));

        let found = registry.lookup(&literal, "https").unwrap();
        assert_eq!(found.target, literal_target);
    }

    #[test]
    fn test_cross_origin_takeover_of_live_host_is_rejected() {
        let registry = Registry::new();
        let host = RouteKey::new("app.localhost").unwrap();
        let other_target: SocketAddr = "127.0.0.1:9090".parse().unwrap();

        registry.upsert(Route::new(host.clone(), "container-1", target(), "https", true));
        registry.upsert(Route::new(host.clone(), "container-2", other_target, "https", true));

        let found = registry.lookup(&host, "https").unwrap();
        assert_eq!(found.target, target());
        assert_eq!(found.origin, "container-1");
    }

    #[test]
    fn test_cross_origin_takeover_succeeds_once_prior_origin_is_gone() {
        let registry = Registry::new();
        let host = RouteKey::new("app.localhost").unwrap();
        let other_target: SocketAddr = "127.0.0.1:9090".parse().unwrap();

        registry.upsert(Route::new(host.clone(), "container-1", target(), "https", true));
        registry.remove_by_origin("container-1");
        registry.upsert(Route::new(host.clone(), "container-2", other_target, "https", true));

        let found = registry.lookup(&host, "https").unwrap();
        assert_eq!(found.target, other_target);
        assert_eq!(found.origin, "container-2");

        // the old origin's bookkeeping must not resurrect and delete the new owner
        registry.remove_by_origin("container-1");
        assert!(registry.lookup(&host, "https").is_some());
    }

    #[test]
    fn test_remove_by_origin() {
        let registry = Registry::new();
        let host1 = RouteKey::new("a.localhost").unwrap();
        let host2 = RouteKey::new("b.localhost").unwrap();
        registry.upsert(Route::new(host1.clone(), "container-1", target(), "https", true));
        registry.upsert(Route::new(host2.clone(), "container-1", target(), "https", true));

        registry.remove_by_origin("container-1");

        assert!(registry.lookup(&host1, "https").is_none());
        assert!(registry.lookup(&host2, "https").is_none());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_idempotent_upsert_does_not_notify() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        registry.subscribe(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        let host = RouteKey::new("app.localhost").unwrap();
        let route = Route::new(host, "container-1", target(), "https", true);
        registry.upsert(route.clone());
        registry.upsert(route);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
