//! Route Registry
//!
//! The registry is devproxy's single source of truth for host -> backend
//! routing. It is updated by the container watcher/synchronizer and read by
//! every entrypoint and by the DNS server. Reads never block on writes:
//! subscriber callbacks are invoked outside the write lock so a slow
//! subscriber cannot stall a route update.

mod route;
mod state;

pub use route::{Route, RouteKey};
pub use state::{Registry, RegistryEvent, RegistryEventKind};
