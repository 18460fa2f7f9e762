//! TLS handling module
//!
//! Builds the per-connection OpenSSL context used by the HTTPS entrypoint.
//! Unlike a static TLS server, devproxy's certificate isn't known until the
//! ClientHello's SNI has been read, so the base acceptor carries no
//! certificate; each accepted connection gets its own [`openssl::ssl::Ssl`]
//! with the leaf selected by the certificate manager.

mod acceptor;

pub use acceptor::{bare_ssl, build_base_acceptor, connection_ssl};
