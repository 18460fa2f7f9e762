//! UDP/TCP DNS listener
//!
//! Deliberately does not build on `hickory-server`'s `ServerFuture` +
//! `RequestHandler` abstraction: that abstraction decodes every request into
//! a typed `Message` before handing it to the handler, and the forwarding
//! path here must relay upstream's response bytes verbatim (re-encoding a
//! decoded message risks incidental differences from what the upstream
//! actually sent). Instead this owns its own UDP socket and TCP listener
//! directly and uses `hickory-proto`'s `Message` type only for the
//! authoritative answers it constructs itself.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Header, Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{RData, Record, RecordType};
use log::{debug, warn};
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinSet;

use crate::common::{DevproxyError, Result};
use crate::shutdown::Fabric;

const UDP_MAX_DATAGRAM: usize = 4096;
const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Live-reconfigurable view of the pieces of DNS config that apply to every
/// in-flight query. Held behind a lock so a SIGHUP reload can swap it without
/// restarting the listeners.
struct DnsState {
    suffixes: Vec<String>,
    upstream: SocketAddr,
}

/// The DNS entrypoint: binds UDP and TCP on one address and answers or
/// forwards every query it receives.
pub struct DnsServer {
    listen: SocketAddr,
    state: Arc<RwLock<DnsState>>,
    fabric: Fabric,
}

impl DnsServer {
    pub fn new(listen: SocketAddr, suffixes: Vec<String>, upstream: SocketAddr, fabric: Fabric) -> Self {
        Self {
            listen,
            state: Arc::new(RwLock::new(DnsState { suffixes, upstream })),
            fabric,
        }
    }

    /// Apply a live config reload: new suffix list and/or upstream resolver.
    /// Safe to call concurrently with in-flight queries.
    pub fn reconfigure(&self, suffixes: Vec<String>, upstream: SocketAddr) {
        let mut state = self.state.write();
        state.suffixes = suffixes;
        state.upstream = upstream;
    }

    /// A cheap, `'static` handle that can reconfigure this server after
    /// `run` has taken ownership of it and moved it into a task.
    pub fn reload_handle(&self) -> DnsReloadHandle {
        DnsReloadHandle { state: Arc::clone(&self.state) }
    }

    /// Run the UDP and TCP listeners until shutdown is requested.
    pub async fn run(self) -> Result<()> {
        let udp = UdpSocket::bind(self.listen).await.map_err(DevproxyError::Io)?;
        let tcp = TcpListener::bind(self.listen).await.map_err(DevproxyError::Io)?;
        debug!("dns server listening on {} (udp+tcp)", self.listen);

        let mut tasks = JoinSet::new();

        let udp_state = Arc::clone(&self.state);
        let udp_fabric = self.fabric.clone();
        tasks.spawn(async move { run_udp(udp, udp_state, udp_fabric).await });

        let tcp_state = Arc::clone(&self.state);
        let tcp_fabric = self.fabric.clone();
        tasks.spawn(async move { run_tcp(tcp, tcp_state, tcp_fabric).await });

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!("dns listener task error: {}", e);
            }
        }

        Ok(())
    }
}

/// Handle returned by [`DnsServer::reload_handle`] for applying a SIGHUP
/// reload once the server itself has been consumed by `run`.
#[derive(Clone)]
pub struct DnsReloadHandle {
    state: Arc<RwLock<DnsState>>,
}

impl DnsReloadHandle {
    pub fn reconfigure(&self, suffixes: Vec<String>, upstream: SocketAddr) {
        let mut state = self.state.write();
        state.suffixes = suffixes;
        state.upstream = upstream;
    }
}

async fn run_udp(socket: UdpSocket, state: Arc<RwLock<DnsState>>, fabric: Fabric) -> Result<()> {
    let socket = Arc::new(socket);
    let mut buf = vec![0u8; UDP_MAX_DATAGRAM];

    loop {
        tokio::select! {
            _ = fabric.cancelled() => return Ok(()),
            result = socket.recv_from(&mut buf) => {
                let (len, peer) = match result {
                    Ok(v) => v,
                    Err(e) => { warn!("dns udp recv error: {}", e); continue; }
                };
                let query = buf[..len].to_vec();
                let state = Arc::clone(&state);
                let socket = Arc::clone(&socket);
                tokio::spawn(async move {
                    let response = answer_query(&query, &state).await;
                    if let Err(e) = socket.send_to(&response, peer).await {
                        warn!("dns udp send error to {}: {}", peer, e);
                    }
                });
            }
        }
    }
}

async fn run_tcp(listener: TcpListener, state: Arc<RwLock<DnsState>>, fabric: Fabric) -> Result<()> {
    loop {
        tokio::select! {
            _ = fabric.cancelled() => return Ok(()),
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(v) => v,
                    Err(e) => { warn!("dns tcp accept error: {}", e); continue; }
                };
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_tcp_connection(stream, &state).await {
                        debug!("dns tcp connection from {} ended: {}", peer, e);
                    }
                });
            }
        }
    }
}

async fn handle_tcp_connection(mut stream: TcpStream, state: &Arc<RwLock<DnsState>>) -> Result<()> {
    loop {
        let mut len_buf = [0u8; 2];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return Ok(()); // peer closed
        }
        let len = u16::from_be_bytes(len_buf) as usize;

        let mut query = vec![0u8; len];
        stream.read_exact(&mut query).await.map_err(DevproxyError::Io)?;

        let response = answer_query(&query, state).await;
        let response_len = (response.len() as u16).to_be_bytes();
        stream.write_all(&response_len).await.map_err(DevproxyError::Io)?;
        stream.write_all(&response).await.map_err(DevproxyError::Io)?;
    }
}

/// Decide whether to answer authoritatively or forward, and produce the
/// exact bytes to send back to the client.
async fn answer_query(query: &[u8], state: &Arc<RwLock<DnsState>>) -> Vec<u8> {
    let (suffixes, upstream) = {
        let state = state.read();
        (state.suffixes.clone(), state.upstream)
    };

    let message = match Message::from_vec(query) {
        Ok(m) => m,
        Err(e) => {
            warn!("dns: failed to parse query: {}", e);
            return servfail_for(query);
        }
    };

    let in_suffix = message
        .queries()
        .first()
        .map(|q| matches_suffix(&q.name().to_string(), &suffixes))
        .unwrap_or(false);

    if in_suffix {
        return build_authoritative_response(&message);
    }

    match forward(query, upstream).await {
        Ok(response) => response,
        Err(e) => {
            warn!("dns: upstream forward to {} failed: {}", upstream, e);
            servfail_for(query)
        }
    }
}

/// True if `qname` (as rendered by hickory, with a trailing dot) equals or
/// is a subdomain of any configured suffix.
fn matches_suffix(qname: &str, suffixes: &[String]) -> bool {
    let qname = qname.trim_end_matches('.').to_lowercase();
    suffixes.iter().any(|suffix| {
        let suffix = suffix.trim_end_matches('.').to_lowercase();
        qname == suffix || qname.ends_with(&format!(".{}", suffix))
    })
}

fn build_authoritative_response(request: &Message) -> Vec<u8> {
    let mut response = Message::new();
    response.set_id(request.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(OpCode::Query);
    response.set_authoritative(true);
    response.set_response_code(ResponseCode::NoError);

    for query in request.queries() {
        response.add_query(query.clone());

        match query.query_type() {
            RecordType::A => {
                response.add_answer(Record::from_rdata(
                    query.name().clone().into(),
                    60,
                    RData::A(A(Ipv4Addr::LOCALHOST)),
                ));
            }
            RecordType::AAAA => {
                // Our fixed answer address is loopback, so we can safely
                // answer AAAA with ::1 rather than an empty success.
                response.add_answer(Record::from_rdata(
                    query.name().clone().into(),
                    60,
                    RData::AAAA(AAAA(Ipv6Addr::LOCALHOST)),
                ));
            }
            _ => {
                // NOERROR, no answers, AA already set above.
            }
        }
    }

    response.to_vec().unwrap_or_else(|e| {
        warn!("dns: failed to encode authoritative response: {}", e);
        servfail_for_id(request.id())
    })
}

/// Forward the raw query bytes to `upstream` over UDP and return the raw
/// response bytes, unmodified.
async fn forward(query: &[u8], upstream: SocketAddr) -> Result<Vec<u8>> {
    let socket = UdpSocket::bind(match upstream {
        SocketAddr::V4(_) => "0.0.0.0:0",
        SocketAddr::V6(_) => "[::]:0",
    })
    .await
    .map_err(DevproxyError::Io)?;
    socket.connect(upstream).await.map_err(DevproxyError::Io)?;
    socket.send(query).await.map_err(DevproxyError::Io)?;

    let mut buf = vec![0u8; UDP_MAX_DATAGRAM];
    let len = tokio::time::timeout(FORWARD_TIMEOUT, socket.recv(&mut buf))
        .await
        .map_err(|_| DevproxyError::Dns(format!("upstream {} timed out", upstream)))?
        .map_err(DevproxyError::Io)?;

    buf.truncate(len);
    Ok(buf)
}

fn servfail_for(query: &[u8]) -> Vec<u8> {
    let id = Message::from_vec(query).map(|m| m.id()).unwrap_or(0);
    servfail_for_id(id)
}

fn servfail_for_id(id: u16) -> Vec<u8> {
    let mut header = Header::new();
    header.set_id(id);
    header.set_message_type(MessageType::Response);
    header.set_op_code(OpCode::Query);
    header.set_response_code(ResponseCode::ServFail);
    let mut message = Message::new();
    message.set_header(header);
    message.to_vec().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_suffix_exact_and_subdomain() {
        let suffixes = vec!["localhost".to_string(), "test".to_string()];
        assert!(matches_suffix("localhost.", &suffixes));
        assert!(matches_suffix("app.localhost.", &suffixes));
        assert!(matches_suffix("deep.app.test.", &suffixes));
        assert!(!matches_suffix("example.com.", &suffixes));
    }

    #[test]
    fn test_matches_suffix_case_insensitive() {
        let suffixes = vec!["LocalHost".to_string()];
        assert!(matches_suffix("App.LOCALHOST.", &suffixes));
    }

    #[test]
    fn test_build_authoritative_response_answers_a_record() {
        use hickory_proto::op::Query;
        use hickory_proto::rr::Name;
        use std::str::FromStr;

        let mut request = Message::new();
        request.set_id(42);
        request.add_query(Query::query(Name::from_str("app.localhost.").unwrap(), RecordType::A));

        let response_bytes = build_authoritative_response(&request);
        let response = Message::from_vec(&response_bytes).unwrap();
        assert_eq!(response.id(), 42);
        assert!(response.header().authoritative());
        assert_eq!(response.answers().len(), 1);
    }

    #[test]
    fn test_servfail_preserves_query_id() {
        use hickory_proto::op::Query;
        use hickory_proto::rr::Name;
        use std::str::FromStr;

        let mut request = Message::new();
        request.set_id(7);
        request.add_query(Query::query(Name::from_str("example.com.").unwrap(), RecordType::A));
        let bytes = request.to_vec().unwrap();

        let response = Message::from_vec(&servfail_for(&bytes)).unwrap();
        assert_eq!(response.id(), 7);
        assert_eq!(response.response_code(), ResponseCode::ServFail);
    }
}
