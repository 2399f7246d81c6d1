//! # Proxy Server
//!
//! Accepts game clients and helper sessions on two listeners from one
//! select loop.
//!
//! Each game connection dials the upstream server and becomes a
//! [`Tunnel`]. Each helper connection becomes an [`AuxiliaryChannel`].
//! On shutdown the listeners stop accepting and open tunnels get
//! `shutdown_timeout` to wind down.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ProxyConfig;
use crate::error::Result;
use crate::service::auxiliary::AuxiliaryChannel;
use crate::service::context::ProxyContext;
use crate::service::tunnel::Tunnel;
use crate::utils::timeout::with_timeout_error;

const SHUTDOWN_REASON: &str = "proxy shutting down";

pub struct ProxyServer {
    context: Arc<ProxyContext>,
    active: Arc<AtomicUsize>,
    tunnels: TaskTracker,
    stop: CancellationToken,
}

impl ProxyServer {
    /// Server with the built-in pipeline.
    ///
    /// # Errors
    /// Fails if the pipeline cannot be assembled.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        Ok(Self::with_context(Arc::new(ProxyContext::new(config)?)))
    }

    pub fn with_context(context: Arc<ProxyContext>) -> Self {
        Self {
            context,
            active: Arc::new(AtomicUsize::new(0)),
            tunnels: TaskTracker::new(),
            stop: CancellationToken::new(),
        }
    }

    pub fn context(&self) -> &Arc<ProxyContext> {
        &self.context
    }

    /// Bind both listeners and serve until CTRL+C.
    pub async fn start(&self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });
        self.start_with_shutdown(shutdown_rx).await
    }

    /// Bind both listeners and serve until `shutdown_rx` fires.
    pub async fn start_with_shutdown(&self, shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let config = &self.context.config;
        let game = TcpListener::bind(&config.server.listen_address).await?;
        let auxiliary = TcpListener::bind(&config.auxiliary.listen_address).await?;
        self.serve(game, auxiliary, shutdown_rx).await
    }

    /// Serve on already-bound listeners.
    #[instrument(skip_all, fields(
        game = ?game.local_addr().ok(),
        auxiliary = ?auxiliary.local_addr().ok(),
    ))]
    pub async fn serve(
        &self,
        game: TcpListener,
        auxiliary: TcpListener,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        info!(upstream = %self.context.config.server.upstream_address, "Proxy listening");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down proxy. Waiting for tunnels to close...");
                    self.drain(self.context.config.server.shutdown_timeout).await;
                    self.context.metrics.log_metrics();
                    return Ok(());
                }

                accepted = game.accept() => match accepted {
                    Ok((stream, peer)) => self.accept_game(stream, peer),
                    Err(e) => error!(error = %e, "Error accepting game connection"),
                },

                accepted = auxiliary.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(error = %e, "Could not disable Nagle");
                        }
                        AuxiliaryChannel::spawn(Arc::clone(&self.context), stream, peer);
                    }
                    Err(e) => error!(error = %e, "Error accepting auxiliary connection"),
                },
            }
        }
    }

    pub fn active_tunnels(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    fn accept_game(&self, client: TcpStream, peer: SocketAddr) {
        let limit = self.context.config.server.max_connections;
        if self.active.load(Ordering::Acquire) >= limit {
            warn!(%peer, limit, "Connection limit reached, refusing client");
            return;
        }
        self.active.fetch_add(1, Ordering::AcqRel);

        let context = Arc::clone(&self.context);
        let active = Arc::clone(&self.active);
        let stop = self.stop.clone();
        self.tunnels.spawn(async move {
            if let Err(e) = open_tunnel(context, client, peer, stop).await {
                warn!(%peer, error = %e, "Could not open tunnel");
            }
            active.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Close every open tunnel, waiting up to `grace` for them to finish.
    async fn drain(&self, grace: Duration) {
        self.stop.cancel();
        self.tunnels.close();
        if tokio::time::timeout(grace, self.tunnels.wait()).await.is_err() {
            warn!(
                remaining = self.active_tunnels(),
                "Shutdown timeout reached, forcing exit"
            );
        } else {
            info!("All tunnels closed");
        }
    }
}

async fn open_tunnel(
    context: Arc<ProxyContext>,
    client: TcpStream,
    peer: SocketAddr,
    stop: CancellationToken,
) -> Result<()> {
    let upstream = context.config.server.upstream_address.clone();
    let server = with_timeout_error(
        async { Ok(TcpStream::connect(&upstream).await?) },
        context.config.server.connect_timeout,
    )
    .await?;
    let server_addr = server.peer_addr()?;
    client.set_nodelay(true)?;
    server.set_nodelay(true)?;

    let tunnel = Tunnel::new(context, client, peer, server, server_addr);
    tokio::select! {
        _ = Arc::clone(&tunnel).run() => {}
        _ = stop.cancelled() => {
            tunnel.disconnect(SHUTDOWN_REASON);
            tunnel.closed().await;
        }
    }
    Ok(())
}
