//! Protocol detection module
//!
//! Provides the byte-level sniffing the generic TCP entrypoint needs: a
//! ClientHello SNI extractor and a PostgreSQL `SSLRequest` preamble check.

mod pg;
mod sni;

pub use pg::is_postgres_ssl_request;
pub use sni::parse_client_hello_sni;
