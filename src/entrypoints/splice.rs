//! Bidirectional byte splicing shared by the TCP entrypoint and the HTTPS
//! entrypoint's WebSocket upgrade path.
//!
//! Generalizes the teacher's `proxy::forwarder::proxy_data`: instead of
//! returning as soon as either direction finishes (which truncates whatever
//! the still-open side was about to send), each direction half-closes its
//! peer on EOF and both directions are awaited to completion, so a
//! half-closed connection still drains the other side per spec.

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const SPLICE_BUFFER_SIZE: usize = 16 * 1024;

/// Copy bytes in both directions between `a` and `b` until both sides are
/// closed. Read/write errors end that direction only; they are not surfaced
/// to the caller, matching "never crash on a backend error" from the error
/// handling design.
pub async fn splice<A, B>(a: A, b: B)
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (ar, aw) = tokio::io::split(a);
    let (br, bw) = tokio::io::split(b);

    let a_to_b = tokio::spawn(copy_and_shutdown(ar, bw, "a->b"));
    let b_to_a = tokio::spawn(copy_and_shutdown(br, aw, "b->a"));

    let _ = tokio::join!(a_to_b, b_to_a);
}

async fn copy_and_shutdown<R, W>(mut reader: R, mut writer: W, label: &'static str)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; SPLICE_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                total += n as u64;
                if writer.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }

    debug!("splice {}: {} bytes, half-closing", label, total);
    let _ = writer.shutdown().await;
}
