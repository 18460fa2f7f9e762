//! Shutdown & Reload Fabric
//!
//! A single [`Fabric`] is threaded through every long-running task (each
//! entrypoint, the DNS server, the container watcher). On SIGTERM/SIGINT it
//! cancels all of them and runs cleanup hooks in reverse registration order;
//! on SIGHUP it triggers a configuration reload without tearing anything down.

mod fabric;

pub use fabric::Fabric;
