//! The HTTP substrate the Runtime API router is served on.

use axum::Router;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Future returned by [`RuntimeHost::serve`].
pub type HostFuture<'a> = Pin<Box<dyn Future<Output = io::Result<RunningHost>> + Send + 'a>>;

/// Something that can serve the Runtime API router.
///
/// The server binds its router to a host, then asks the running host where
/// it is reachable. Implement this to serve from something other than a
/// loopback TCP socket.
pub trait RuntimeHost: Send + Sync {
    /// Begins serving `router` until `shutdown` fires.
    fn serve(&self, router: Router, shutdown: CancellationToken) -> HostFuture<'_>;
}

/// A host that has started serving.
#[derive(Debug)]
pub struct RunningHost {
    addresses: Vec<SocketAddr>,
    task: JoinHandle<io::Result<()>>,
}

impl RunningHost {
    /// Wraps a serving task and the addresses it is reachable on.
    pub fn new(addresses: Vec<SocketAddr>, task: JoinHandle<io::Result<()>>) -> Self {
        Self { addresses, task }
    }

    /// Addresses the host reported after binding.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    /// The first address a runtime on this machine can connect to.
    ///
    /// Addresses with port 0 are skipped; an unspecified IP is reported as
    /// loopback.
    pub fn runtime_address(&self) -> Option<SocketAddr> {
        self.addresses
            .iter()
            .find(|addr| addr.port() != 0)
            .map(|addr| {
                if addr.ip().is_unspecified() {
                    SocketAddr::from((Ipv4Addr::LOCALHOST, addr.port()))
                } else {
                    *addr
                }
            })
    }

    /// Stops serving immediately, dropping open connections.
    pub(crate) fn abort(self) {
        self.task.abort();
    }
}

/// Serves over a TCP listener on a local address.
#[derive(Debug, Clone, Copy)]
pub struct TcpHost {
    addr: SocketAddr,
}

impl TcpHost {
    /// Binds `127.0.0.1:port`. Port 0 picks an ephemeral port.
    pub fn loopback(port: u16) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        }
    }

    /// Binds an arbitrary address.
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl RuntimeHost for TcpHost {
    fn serve(&self, router: Router, shutdown: CancellationToken) -> HostFuture<'_> {
        Box::pin(async move {
            let listener = TcpListener::bind(self.addr).await?;
            let local_addr = listener.local_addr()?;

            let task = tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
                    .inspect_err(|e| tracing::error!(error = %e, "Runtime API host failed"))
            });

            tracing::debug!(addr = %local_addr, "Runtime API host listening");
            Ok(RunningHost::new(vec![local_addr], task))
        })
    }
}
