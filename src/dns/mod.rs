//! Local recursive DNS server
//!
//! Authoritative for a small set of configured suffixes (answering every
//! name under them with the loopback address so containers become reachable
//! as `<name>.localhost`), and a transparent forwarder for everything else.
//! Forwarded queries are relayed to the upstream resolver byte-for-byte and
//! the response relayed back the same way, so this server never needs to
//! understand record types it doesn't already answer for itself.

mod server;

pub use server::{DnsReloadHandle, DnsServer};
