use std::io;
use std::sync::Arc;
use std::time::Duration;

use hyper::upgrade::OnUpgrade;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::buffer_pool::BufferPool;
use crate::proxy::{empty, full, ProxyBody};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const KEEPALIVE_TIME: Duration = Duration::from_secs(10);

/// Error type for establishing the upstream leg of a tunnel
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("connect to {addr} timed out")]
    Timeout { addr: String },

    #[error("{0}")]
    Connect(#[from] io::Error),
}

/// Open a TCP connection to the tunnel target.
///
/// A single attempt, bounded by [`DIAL_TIMEOUT`], with TCP keep-alive
/// enabled on the resulting socket.
pub async fn dial(addr: &str) -> Result<TcpStream, DialError> {
    let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| DialError::Timeout {
            addr: addr.to_string(),
        })??;

    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_TIME);
    SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
    Ok(stream)
}

/// Handle one CONNECT request.
///
/// Dial first: a target that cannot be reached gets a 503 and no tunnel
/// ever exists. Then take the upgrade handle for the client connection; a
/// request the server layer cannot hand over gets a 500 and the dialed
/// upstream is dropped. On success the 200 response is the tunnel
/// acknowledgment, and the spawned task relays raw bytes once the server
/// layer completes the upgrade.
pub async fn handle<B>(mut req: Request<B>, pool: Arc<BufferPool>) -> Response<ProxyBody> {
    let addr = match req.uri().authority() {
        Some(authority) => authority.to_string(),
        None => req.uri().to_string(),
    };

    let upstream = match dial(&addr).await {
        Ok(stream) => stream,
        Err(err) => {
            let mut resp = Response::new(full(err.to_string()));
            *resp.status_mut() = http::StatusCode::SERVICE_UNAVAILABLE;
            return resp;
        }
    };

    let on_upgrade = match req.extensions_mut().remove::<OnUpgrade>() {
        Some(on_upgrade) => on_upgrade,
        None => {
            // No raw client socket to take over; `upstream` drops here.
            let mut resp = Response::new(full("connection does not support hijacking"));
            *resp.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
            return resp;
        }
    };

    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                if let Err(err) = bridge(TokioIo::new(upgraded), upstream, pool).await {
                    debug!("tunnel to {addr} closed: {err}");
                }
            }
            // The dialed upstream drops before any tunneled byte.
            Err(err) => warn!("hijack of client connection failed: {err}"),
        }
    });

    // The server layer writes and flushes this acknowledgment ahead of the
    // first tunneled byte.
    Response::new(empty())
}

/// Relay raw bytes between the hijacked client connection and the upstream
/// socket until either direction finishes.
///
/// First completion wins: the bridge returns as soon as one copy loop
/// reports EOF or an error, without collecting the second loop's result.
/// Aborting the survivor drops its socket halves; together with the halves
/// the finished loop already released, both sockets close exactly once and
/// any read or write still pending in the unawaited loop is unblocked.
pub async fn bridge<C, U>(client: C, upstream: U, pool: Arc<BufferPool>) -> io::Result<u64>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_rd, client_wr) = tokio::io::split(client);
    let (upstream_rd, upstream_wr) = tokio::io::split(upstream);

    // Capacity 2 keeps the second, uncollected report from blocking its loop
    let (done_tx, mut done_rx) = mpsc::channel::<io::Result<u64>>(2);

    let tx = done_tx.clone();
    let uplink_pool = Arc::clone(&pool);
    let uplink = tokio::spawn(async move {
        let result = copy_buffer(client_rd, upstream_wr, uplink_pool).await;
        let _ = tx.send(result).await;
    });
    let downlink = tokio::spawn(async move {
        let result = copy_buffer(upstream_rd, client_wr, pool).await;
        let _ = done_tx.send(result).await;
    });

    let first = done_rx.recv().await;
    uplink.abort();
    downlink.abort();

    match first {
        Some(result) => result,
        // Both loops died without reporting; nothing left to release.
        None => Ok(0),
    }
}

/// Copy bytes from `src` to `dst` through one pooled buffer until EOF or
/// the first error.
async fn copy_buffer<R, W>(mut src: R, mut dst: W, pool: Arc<BufferPool>) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = pool.get().await;
    let mut copied = 0u64;

    let result = loop {
        match src.read(&mut buffer).await {
            Ok(0) => break Ok(copied),
            Ok(n) => match dst.write_all(&buffer[..n]).await {
                Ok(()) => copied += n as u64,
                Err(err) => break Err(err),
            },
            Err(err) => break Err(err),
        }
    };

    pool.put(buffer).await;
    result
}
