//! TCP admission gate server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use super::verdict::Verdict;
use crate::error::Result;
use crate::throttle::{key_from_ip, Throttle};

/// Pause before retrying `accept` after it fails.
///
/// Errors such as EMFILE return immediately until a descriptor frees up.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Admission gate that throttles connecting peers by address.
///
/// Every accepted connection gets one JSON verdict line and is closed.
pub struct GateServer<T: Throttle + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The throttle instance
    throttle: Arc<T>,
}

impl<T: Throttle + 'static> GateServer<T> {
    /// Create a new gate server.
    pub fn new(addr: SocketAddr, throttle: Arc<T>) -> Self {
        Self { addr, throttle }
    }

    /// Bind the listening socket.
    ///
    /// Binding separately from serving lets callers read the actual local
    /// address when asking for port 0.
    pub async fn bind(self) -> Result<BoundGate<T>> {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind admission gate");
            e
        })?;

        Ok(BoundGate {
            listener,
            throttle: self.throttle,
        })
    }

    /// Bind and serve until the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.bind().await?.serve_with_shutdown(signal).await
    }
}

/// A gate whose listener is already bound.
pub struct BoundGate<T: Throttle + 'static> {
    listener: TcpListener,
    throttle: Arc<T>,
}

impl<T: Throttle + 'static> BoundGate<T> {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        info!(
            addr = %self.local_addr()?,
            limit = self.throttle.limit(),
            period = ?self.throttle.period(),
            "Starting admission gate"
        );

        tokio::pin!(signal);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let throttle = Arc::clone(&self.throttle);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer, throttle.as_ref()).await {
                                    debug!(peer = %peer, error = %e, "Failed to write verdict");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(
                                error = %e,
                                backoff = ?ACCEPT_ERROR_BACKOFF,
                                "Failed to accept connection"
                            );
                            if backoff_or_shutdown(ACCEPT_ERROR_BACKOFF, &mut signal).await {
                                info!("Admission gate shutting down");
                                break;
                            }
                        }
                    }
                }
                _ = &mut signal => {
                    info!("Admission gate shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Sleep for `delay` unless `signal` resolves first.
///
/// Returns `true` if the gate should shut down.
async fn backoff_or_shutdown<S>(delay: Duration, signal: &mut S) -> bool
where
    S: Future<Output = ()> + Unpin,
{
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = signal => true,
    }
}

async fn handle_connection<T: Throttle + ?Sized>(
    mut stream: TcpStream,
    peer: SocketAddr,
    throttle: &T,
) -> std::io::Result<()> {
    let key = key_from_ip(peer.ip());
    let allowance = throttle.allow(key);
    let verdict = Verdict::new(&allowance, throttle.limit(), Instant::now(), Utc::now());

    if verdict.allowed {
        debug!(peer = %peer, remaining = verdict.remaining, "Admitted connection");
    } else {
        debug!(
            peer = %peer,
            retry_after_ms = verdict.retry_after_ms,
            "Throttled connection"
        );
    }

    let line = verdict.to_line().map_err(std::io::Error::other)?;
    stream.write_all(line.as_bytes()).await?;
    stream.shutdown().await
}
