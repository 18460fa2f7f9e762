//! Certificate Manager
//!
//! Issues and caches leaf certificates on demand, keyed by the hostname
//! requested in a TLS ClientHello's SNI extension. Concurrent requests for
//! the same host are coalesced (single-flight) so a burst of connections to
//! a freshly-registered route triggers exactly one CA signing operation.

mod manager;

pub use manager::{CertificateManager, LeafCertificate};
