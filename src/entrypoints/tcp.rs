//! Generic SNI-routed TCP entrypoint
//!
//! Binds a single port for traffic that is not terminated here: PostgreSQL
//! and any other TLS-wrapped protocol can share one listener as long as
//! devproxy can peek a `server_name` out of the ClientHello, since the
//! backend itself performs the handshake.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::common::Result;
use crate::protocol::{is_postgres_ssl_request, parse_client_hello_sni};
use crate::registry::{Registry, RouteKey};
use crate::shutdown::Fabric;

use super::splice::splice;

const PG_SSL_REQUEST_ACK: &[u8] = b"S";

/// One named TCP entrypoint (e.g. `postgres` bound to `:15432`)
pub struct TcpEntrypoint {
    name: Arc<str>,
    listen: SocketAddr,
    sniff_postgres: bool,
    sniff_buffer_bytes: usize,
    sniff_timeout: Duration,
    registry: Registry,
    fabric: Fabric,
}

impl TcpEntrypoint {
    pub fn new(
        name: impl Into<Arc<str>>,
        listen: SocketAddr,
        sniff_postgres: bool,
        sniff_buffer_bytes: usize,
        sniff_timeout: Duration,
        registry: Registry,
        fabric: Fabric,
    ) -> Self {
        Self {
            name: name.into(),
            listen,
            sniff_postgres,
            sniff_buffer_bytes,
            sniff_timeout,
            registry,
            fabric,
        }
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.listen).await?;
        debug!("tcp entrypoint '{}' listening on {}", self.name, self.listen);

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
                                if let Err(e) = this.handle(stream).await {
                                    debug!("tcp entrypoint '{}' connection from {} ended: {}", this.name, peer, e);
                                }
                            });
                        }
                        Err(e) => warn!("tcp entrypoint '{}' accept error: {}", this.name, e),
                    }
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        warn!("tcp entrypoint '{}' task panicked: {}", this.name, e);
                    }
                }
            }
        }

        Fabric::wait_for_tasks(&mut tasks, Duration::from_secs(10)).await;
        Ok(())
    }

    async fn handle(&self, mut client: TcpStream) -> Result<()> {
        let mut buf = Vec::with_capacity(self.sniff_buffer_bytes);

        if self.sniff_postgres {
            if !self.consume_postgres_ssl_request(&mut client, &mut buf).await? {
                return Ok(()); // not a PG SSLRequest preamble; closed already below
            }
        }

        let Some(host) = self.sniff_sni(&mut client, &mut buf).await? else {
            debug!("tcp entrypoint '{}': no SNI within sniff window, closing", self.name);
            return Ok(());
        };

        let Ok(key) = RouteKey::new(&host) else {
            debug!("tcp entrypoint '{}': invalid SNI host '{}', closing", self.name, host);
            return Ok(());
        };

        let Some(route) = self.registry.lookup(&key, &self.name) else {
            debug!("tcp entrypoint '{}': no route for '{}', closing", self.name, host);
            return Ok(());
        };

        let mut backend = TcpStream::connect(route.target).await?;
        backend.write_all(&buf).await?;

        splice(client, backend).await;
        Ok(())
    }

    /// Read and check the fixed 8-byte PostgreSQL `SSLRequest` preamble. On a
    /// match, acknowledges with `S` and drops the preamble from `buf` so the
    /// ClientHello sniff that follows starts clean. Returns `false` (having
    /// already dropped the connection) if the preamble never arrives within
    /// the sniff window.
    async fn consume_postgres_ssl_request(&self, client: &mut TcpStream, buf: &mut Vec<u8>) -> Result<bool> {
        if !self.read_until(client, buf, 8).await? {
            return Ok(false);
        }

        if is_postgres_ssl_request(&buf[..8]) {
            client.write_all(PG_SSL_REQUEST_ACK).await?;
            buf.clear();
        }
        // If it doesn't match, leave the bytes in `buf` — they're the start
        // of whatever protocol the client actually spoke, and the SNI sniff
        // that follows will simply fail to find a ClientHello in them.
        Ok(true)
    }

    /// Buffer bytes from `client` until [`parse_client_hello_sni`] succeeds,
    /// the sniff buffer fills, or the sniff deadline elapses.
    async fn sniff_sni(&self, client: &mut TcpStream, buf: &mut Vec<u8>) -> Result<Option<String>> {
        let deadline = tokio::time::sleep(self.sniff_timeout);
        tokio::pin!(deadline);

        loop {
            if let Some(host) = parse_client_hello_sni(buf) {
                return Ok(Some(host));
            }
            if buf.len() >= self.sniff_buffer_bytes {
                return Ok(None);
            }

            let mut chunk = vec![0u8; self.sniff_buffer_bytes - buf.len()];
            use tokio::io::AsyncReadExt;
            tokio::select! {
                _ = &mut deadline => return Ok(None),
                result = client.read(&mut chunk) => {
                    match result {
                        Ok(0) => return Ok(None),
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        Err(_) => return Ok(None),
                    }
                }
            }
        }
    }

    /// Read into `buf` until it holds at least `target_len` bytes, or the
    /// sniff deadline elapses (returns `false`).
    async fn read_until(&self, client: &mut TcpStream, buf: &mut Vec<u8>, target_len: usize) -> Result<bool> {
        let deadline = tokio::time::sleep(self.sniff_timeout);
        tokio::pin!(deadline);

        while buf.len() < target_len {
            let mut chunk = vec![0u8; target_len - buf.len()];
            use tokio::io::AsyncReadExt;
            tokio::select! {
                _ = &mut deadline => return Ok(false),
                result = client.read(&mut chunk) => {
                    match result {
                        Ok(0) => return Ok(false),
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        Err(_) => return Ok(false),
                    }
                }
            }
        }
        Ok(true)
    }
}
