//! Multi-protocol entrypoints
//!
//! Each entrypoint owns one listening socket and is driven independently;
//! they share only the route registry and the shutdown fabric.

mod forward;
mod http;
mod https;
mod splice;
mod tcp;

pub use http::HttpEntrypoint;
pub use https::HttpsEntrypoint;
pub use splice::splice;
pub use tcp::TcpEntrypoint;
