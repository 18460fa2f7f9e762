//! Plain HTTP entrypoint
//!
//! For hosts with no `http` route registered, redirects to HTTPS with a
//! `308` pointing at the same host and path on the configured HTTPS port —
//! the stateless default from spec.md §4.4. A host whose container opted out
//! of TLS (`<prefix>.tls=false`) is instead reverse-proxied here in plain
//! HTTP, never redirected.

use std::net::SocketAddr;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use log::{debug, warn};
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use crate::common::net::strip_port;
use crate::common::Result;
use crate::registry::{Registry, RouteKey};
use crate::shutdown::Fabric;

use super::forward::{self, ProxyBody};

/// The plain HTTP listener. `https_port` is folded into every `Location`
/// header it emits; omitted from the URL when it is the default `443`.
pub struct HttpEntrypoint {
    name: String,
    listen: SocketAddr,
    https_port: u16,
    registry: Registry,
    fabric: Fabric,
}

impl HttpEntrypoint {
    pub fn new(name: impl Into<String>, listen: SocketAddr, https_port: u16, registry: Registry, fabric: Fabric) -> Self {
        Self {
            name: name.into(),
            listen,
            https_port,
            registry,
            fabric,
        }
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.listen).await?;
        debug!("http entrypoint listening on {}", self.listen);

        let name = self.name;
        let https_port = self.https_port;
        let registry = self.registry;
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.fabric.cancelled() => break,
                accept = listener.accept() => {
                    match accept {
                        Ok((stream, peer)) => {
                            let name = name.clone();
                            let registry = registry.clone();
                            tasks.spawn(serve_one(stream, peer, name, https_port, registry));
                        }
                        Err(e) => warn!("http entrypoint accept error: {}", e),
                    }
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        warn!("http entrypoint connection task panicked: {}", e);
                    }
                }
            }
        }

        Fabric::wait_for_tasks(&mut tasks, Duration::from_secs(5)).await;
        Ok(())
    }
}

async fn serve_one(stream: tokio::net::TcpStream, peer: SocketAddr, name: String, https_port: u16, registry: Registry) {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let name = name.clone();
        let registry = registry.clone();
        async move { handle(req, peer, &name, https_port, &registry).await }
    });

    let mut builder = hyper::server::conn::http1::Builder::new();
    builder.timer(TokioTimer::new());
    if let Err(e) = builder.serve_connection(io, service).with_upgrades().await {
        debug!("http entrypoint connection error: {}", e);
    }
}

async fn handle(
    req: Request<Incoming>,
    peer: SocketAddr,
    name: &str,
    https_port: u16,
    registry: &Registry,
) -> std::result::Result<Response<ProxyBody>, std::convert::Infallible> {
    let Some(host) = host_header(&req) else {
        return Ok(forward::error_response(StatusCode::BAD_REQUEST, "missing or malformed Host header"));
    };
    let host = strip_port(&host).to_string();

    if let Ok(key) = RouteKey::new(&host) {
        if let Some(route) = registry.lookup(&key, name) {
            return forward::proxy_to_backend(req, &host, &route, "http", peer).await;
        }
    }

    Ok(redirect_response(&req, &host, https_port))
}

fn redirect_response(req: &Request<Incoming>, host: &str, https_port: u16) -> Response<ProxyBody> {
    let path_and_query = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    let location = if https_port == 443 {
        format!("https://{}{}", host, path_and_query)
    } else {
        format!("https://{}:{}{}", host, https_port, path_and_query)
    };

    Response::builder()
        .status(StatusCode::PERMANENT_REDIRECT)
        .header("Location", location)
        .body(Full::new(Bytes::new()).map_err(|never: std::convert::Infallible| match never {}).boxed())
        .expect("redirect response is well-formed")
}

fn host_header(req: &Request<Incoming>) -> Option<String> {
    req.headers()
        .get(hyper::header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .map(|h| h.to_string())
}

#[cfg(test)]
mod tests {
    use hyper::Request as HyperRequest;

    #[test]
    fn test_strip_port_used_for_host() {
        assert_eq!(crate::common::net::strip_port("app.localhost:8080"), "app.localhost");
    }

    #[test]
    fn test_redirect_location_omits_default_port() {
        let req = HyperRequest::builder()
            .uri("/path?x=1")
            .header("Host", "app.localhost")
            .body(())
            .unwrap();
        let (parts, _) = req.into_parts();
        let host = parts
            .headers
            .get(hyper::header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap();
        let host = crate::common::net::strip_port(host);
        let path_and_query = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let location = format!("https://{}{}", host, path_and_query);
        assert_eq!(location, "https://app.localhost/path?x=1");
    }

    #[test]
    fn test_redirect_location_includes_nondefault_port() {
        let req = HyperRequest::builder()
            .uri("/")
            .header("Host", "app.localhost")
            .body(())
            .unwrap();
        let (parts, _) = req.into_parts();
        let host = parts
            .headers
            .get(hyper::header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap();
        let host = crate::common::net::strip_port(host);
        let location = format!("https://{}:{}{}", host, 8443, "/");
        assert_eq!(location, "https://app.localhost:8443/");
    }
}
