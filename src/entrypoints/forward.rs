//! Shared HTTP/1.1 reverse-proxy forwarding
//!
//! Connects to a route's backend, forwards the request, and relays the
//! response — including splicing a WebSocket upgrade through once both sides
//! acknowledge it. Used by the HTTPS entrypoint and by the plain HTTP
//! entrypoint's `tls=false` passthrough path; the two differ only in the
//! scheme they record in `X-Forwarded-Proto`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, warn};
use tokio::net::TcpStream;

use crate::registry::Route;

use super::splice::splice;

pub const BACKEND_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const UPGRADE_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
];

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Forward `req` to `route.target` and relay the response back. `proto` is
/// the scheme recorded in `X-Forwarded-Proto` for the backend — `"https"`
/// when the client connection was TLS-terminated here, `"http"` for a plain
/// passthrough route.
pub async fn proxy_to_backend(
    mut req: Request<Incoming>,
    host: &str,
    route: &Route,
    proto: &'static str,
    peer: SocketAddr,
) -> Result<Response<ProxyBody>, Infallible> {
    let is_upgrade = is_websocket_upgrade(&req);
    let client_on_upgrade = is_upgrade.then(|| hyper::upgrade::on(&mut req));

    let forwarded = build_forwarded_request(req, host, peer, proto, is_upgrade);

    let backend_stream = match tokio::time::timeout(BACKEND_CONNECT_TIMEOUT, TcpStream::connect(route.target)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("proxy: connect to backend {} for '{}' failed: {}", route.target, host, e);
            return Ok(error_response(StatusCode::BAD_GATEWAY, "backend connection failed"));
        }
        Err(_) => {
            warn!("proxy: connect to backend {} for '{}' timed out", route.target, host);
            return Ok(error_response(StatusCode::GATEWAY_TIMEOUT, "backend connection timed out"));
        }
    };

    let (mut sender, connection) = match hyper::client::conn::http1::handshake(TokioIo::new(backend_stream)).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!("proxy: handshake with backend {} failed: {}", route.target, e);
            return Ok(error_response(StatusCode::BAD_GATEWAY, "backend handshake failed"));
        }
    };
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("proxy: backend connection closed: {}", e);
        }
    });

    let mut backend_response = match sender.send_request(forwarded).await {
        Ok(response) => response,
        Err(e) => {
            warn!("proxy: backend {} request failed: {}", route.target, e);
            return Ok(error_response(StatusCode::BAD_GATEWAY, "backend request failed"));
        }
    };

    if is_upgrade && backend_response.status() == StatusCode::SWITCHING_PROTOCOLS {
        let backend_on_upgrade = hyper::upgrade::on(&mut backend_response);
        let (parts, _) = backend_response.into_parts();
        let response = Response::from_parts(parts, empty_body());

        if let Some(client_on_upgrade) = client_on_upgrade {
            tokio::spawn(async move {
                let (client_upgraded, backend_upgraded) = match tokio::join!(client_on_upgrade, backend_on_upgrade) {
                    (Ok(client), Ok(backend)) => (client, backend),
                    _ => {
                        warn!("proxy: websocket upgrade handshake did not complete");
                        return;
                    }
                };

                let started = Instant::now();
                let spliced = splice(TokioIo::new(client_upgraded), TokioIo::new(backend_upgraded));
                if tokio::time::timeout(UPGRADE_IDLE_TIMEOUT, spliced).await.is_err() {
                    debug!(
                        "proxy: upgraded stream exceeded {:?} after {:?}, dropping",
                        UPGRADE_IDLE_TIMEOUT,
                        started.elapsed()
                    );
                }
            });
        }

        return Ok(response);
    }

    let (mut parts, body) = backend_response.into_parts();
    strip_hop_by_hop_headers(&mut parts.headers, false);
    Ok(Response::from_parts(parts, body.boxed()))
}

pub fn is_websocket_upgrade(req: &Request<Incoming>) -> bool {
    let has_upgrade_token = req
        .headers()
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false);

    let is_websocket = req
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    has_upgrade_token && is_websocket
}

fn build_forwarded_request(
    req: Request<Incoming>,
    host: &str,
    peer: SocketAddr,
    proto: &'static str,
    is_upgrade: bool,
) -> Request<Incoming> {
    let (mut parts, body) = req.into_parts();
    strip_hop_by_hop_headers(&mut parts.headers, is_upgrade);
    parts.version = hyper::Version::HTTP_11;

    if let Ok(value) = proto.parse() {
        parts.headers.insert("x-forwarded-proto", value);
    }
    if let Ok(value) = peer.ip().to_string().parse() {
        parts.headers.insert("x-forwarded-for", value);
    }
    if let Ok(value) = peer.ip().to_string().parse() {
        parts.headers.insert("x-real-ip", value);
    }
    if let Ok(value) = host.parse() {
        parts.headers.insert("x-forwarded-host", value);
    }

    Request::from_parts(parts, body)
}

/// Strip hop-by-hop headers per RFC 7230 §6.1: the fixed connection-scoped
/// set, plus anything the `Connection` header itself names. `Connection` and
/// `Upgrade` are kept when the request/response is an in-flight upgrade, since
/// the backend needs to see them to agree to switch protocols.
pub fn strip_hop_by_hop_headers(headers: &mut HeaderMap, keep_upgrade: bool) {
    if let Some(connection) = headers.get(header::CONNECTION).cloned() {
        if let Ok(value) = connection.to_str() {
            for name in value.split(',') {
                let name = name.trim();
                if !name.is_empty() {
                    headers.remove(name);
                }
            }
        }
    }

    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }

    if !keep_upgrade {
        headers.remove(header::CONNECTION);
        headers.remove(header::UPGRADE);
    }
}

pub fn empty_body() -> ProxyBody {
    Full::new(Bytes::new()).map_err(|never: Infallible| match never {}).boxed()
}

pub fn error_response(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from_static(message.as_bytes())).map_err(|never: Infallible| match never {}).boxed())
        .expect("static error response is well-formed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Request as HyperRequest;

    #[test]
    fn test_is_websocket_upgrade_requires_both_headers() {
        let req = HyperRequest::builder()
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, "websocket")
            .body(())
            .unwrap();
        let (parts, _) = req.into_parts();
        let has_upgrade_token = parts
            .headers
            .get(header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade")))
            .unwrap_or(false);
        let is_websocket = parts
            .headers
            .get(header::UPGRADE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);
        assert!(has_upgrade_token && is_websocket);
    }

    #[test]
    fn test_strip_hop_by_hop_removes_connection_named_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "close, x-custom".parse().unwrap());
        headers.insert("x-custom", "value".parse().unwrap());
        headers.insert("transfer-encoding", "chunked".parse().unwrap());

        strip_hop_by_hop_headers(&mut headers, false);

        assert!(!headers.contains_key("x-custom"));
        assert!(!headers.contains_key("transfer-encoding"));
        assert!(!headers.contains_key(header::CONNECTION));
    }

    #[test]
    fn test_strip_hop_by_hop_keeps_upgrade_headers_when_requested() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "Upgrade".parse().unwrap());
        headers.insert(header::UPGRADE, "websocket".parse().unwrap());

        strip_hop_by_hop_headers(&mut headers, true);

        assert!(headers.contains_key(header::CONNECTION));
        assert!(headers.contains_key(header::UPGRADE));
    }
}
