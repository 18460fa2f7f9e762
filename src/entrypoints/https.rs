//! TLS-terminating HTTPS entrypoint and reverse proxy
//!
//! Peeks the ClientHello's SNI before binding any TLS state to the
//! connection (cheap, non-consuming), issues or reuses a leaf certificate
//! for that host, then performs the handshake and proxies HTTP/1.1 to the
//! routed backend. WebSocket upgrades are forwarded by opening a second
//! connection to the backend, relaying the 101 response, and splicing the
//! two raw streams once both sides have upgraded.
//!
//! When the peek can't find an SNI hostname (the ClientHello genuinely
//! carries none, or one doesn't arrive inside the peek window), the
//! connection still goes through `Ssl::accept` with no certificate bound;
//! the base acceptor's servername callback (`tls::build_base_acceptor`)
//! rejects it with a fatal `unrecognized_name` alert instead of the raw
//! socket being silently closed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::body::Incoming;
use hyper::header;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use log::{debug, warn};
use openssl::ssl::SslAcceptor;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_openssl::SslStream;

use crate::certmgr::CertificateManager;
use crate::common::net::strip_port;
use crate::common::Result;
use crate::protocol::parse_client_hello_sni;
use crate::registry::{Registry, RouteKey};
use crate::shutdown::Fabric;
use crate::tls::{bare_ssl, connection_ssl};

use super::forward::{self, ProxyBody};

const SNI_PEEK_TIMEOUT: Duration = Duration::from_secs(60);
const SNI_PEEK_BUFFER_BYTES: usize = 4096;

/// The HTTPS entrypoint: terminates TLS and reverse-proxies to the route
/// registry's backend for the request's `Host`.
pub struct HttpsEntrypoint {
    name: Arc<str>,
    listen: SocketAddr,
    registry: Registry,
    certs: Arc<CertificateManager>,
    acceptor: Arc<SslAcceptor>,
    fabric: Fabric,
}

impl HttpsEntrypoint {
    pub fn new(
        name: impl Into<Arc<str>>,
        listen: SocketAddr,
        registry: Registry,
        certs: Arc<CertificateManager>,
        acceptor: Arc<SslAcceptor>,
        fabric: Fabric,
    ) -> Self {
        Self {
            name: name.into(),
            listen,
            registry,
            certs,
            acceptor,
            fabric,
        }
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.listen).await?;
        debug!("https entrypoint '{}' listening on {}", self.name, self.listen);

        let this = Arc::new(self);
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = this.fabric.cancelled() => break,
                accept = listener.accept() => {
                    match accept {
                        Ok((stream, peer)) => {
                            let this = Arc::clone(&this);
                            tasks.spawn(async move {
                                this.handle_connection(stream, peer).await;
                            });
                        }
                        Err(e) => warn!("https entrypoint accept error: {}", e),
                    }
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        warn!("https entrypoint task panicked: {}", e);
                    }
                }
            }
        }

        Fabric::wait_for_tasks(&mut tasks, Duration::from_secs(10)).await;
        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let Some(sni_host) = peek_sni(&stream, SNI_PEEK_TIMEOUT).await else {
            debug!("https entrypoint: no SNI from {} within peek window, rejecting handshake", peer);
            let ssl = match bare_ssl(&self.acceptor) {
                Ok(ssl) => ssl,
                Err(e) => {
                    warn!("https entrypoint: failed to construct bare TLS session for {}: {}", peer, e);
                    return;
                }
            };
            let mut tls_stream = match SslStream::new(ssl, stream) {
                Ok(s) => Box::pin(s),
                Err(e) => {
                    warn!("https entrypoint: failed to construct TLS stream for {}: {}", peer, e);
                    return;
                }
            };
            match tls_stream.as_mut().accept().await {
                Ok(()) => warn!("https entrypoint: handshake with {} unexpectedly succeeded with no SNI", peer),
                Err(e) => debug!("https entrypoint: rejected SNI-less handshake from {}: {}", peer, e),
            }
            return;
        };

        let leaf = match self.certs.get_or_issue(&sni_host).await {
            Ok(leaf) => leaf,
            Err(e) => {
                warn!("https entrypoint: certificate issuance for '{}' failed: {}", sni_host, e);
                return;
            }
        };

        let ssl = match connection_ssl(&self.acceptor, &leaf) {
            Ok(ssl) => ssl,
            Err(e) => {
                warn!("https entrypoint: failed to bind leaf certificate for '{}': {}", sni_host, e);
                return;
            }
        };

        let mut tls_stream = match SslStream::new(ssl, stream) {
            Ok(s) => Box::pin(s),
            Err(e) => {
                warn!("https entrypoint: failed to construct TLS stream for '{}': {}", sni_host, e);
                return;
            }
        };

        if let Err(e) = tls_stream.as_mut().accept().await {
            debug!("https entrypoint: TLS handshake with {} failed: {}", peer, e);
            return;
        }

        let io = TokioIo::new(tls_stream);
        let service = service_fn(move |req| {
            let this = Arc::clone(&self);
            async move { this.proxy(req, peer).await }
        });

        let mut builder = hyper::server::conn::http1::Builder::new();
        builder.timer(TokioTimer::new());
        if let Err(e) = builder.serve_connection(io, service).with_upgrades().await {
            debug!("https entrypoint: connection from {} ended: {}", peer, e);
        }
    }

    async fn proxy(
        self: Arc<Self>,
        req: Request<Incoming>,
        peer: SocketAddr,
    ) -> std::result::Result<Response<ProxyBody>, std::convert::Infallible> {
        let Some(host) = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(strip_port)
            .filter(|h| !h.is_empty())
        else {
            return Ok(forward::error_response(StatusCode::BAD_REQUEST, "missing or malformed Host header"));
        };
        let host = host.to_string();

        let Ok(key) = RouteKey::new(&host) else {
            return Ok(forward::error_response(StatusCode::BAD_REQUEST, "invalid Host header"));
        };

        let Some(route) = self.registry.lookup(&key, &self.name) else {
            return Ok(forward::error_response(StatusCode::NOT_FOUND, "no route for host"));
        };

        forward::proxy_to_backend(req, &host, &route, "https", peer).await
    }
}

/// Peek (without consuming) bytes from `stream` until a complete ClientHello
/// with an SNI extension is found, the peek buffer fills, or `timeout`
/// elapses.
async fn peek_sni(stream: &TcpStream, timeout: Duration) -> Option<String> {
    let deadline = Instant::now() + timeout;
    let mut buf = vec![0u8; SNI_PEEK_BUFFER_BYTES];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }

        let peeked = match tokio::time::timeout(remaining, stream.peek(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(_)) | Err(_) => return None,
        };

        if let Some(host) = parse_client_hello_sni(&buf[..peeked]) {
            return Some(host);
        }
        if peeked == buf.len() {
            return None;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || tokio::time::timeout(remaining, stream.readable()).await.is_err() {
            return None;
        }
    }
}
