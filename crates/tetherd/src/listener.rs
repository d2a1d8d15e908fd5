//! TCP accept loop feeding the multi-client server.
//!
//! Every accepted socket becomes a peer session keyed by its remote address.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use tether_services::{Server, StreamTransport};

pub struct PeerListener {
    listener: TcpListener,
    server: Arc<Server>,
    shutdown: broadcast::Receiver<()>,
}

impl PeerListener {
    pub async fn bind(
        addr: &str,
        server: Arc<Server>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind peer listener on {addr}"))?;
        tracing::info!(addr = %listener.local_addr()?, "peer listener bound");
        Ok(Self {
            listener,
            server,
            shutdown,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("peer listener shutting down");
                    return Ok(());
                }

                result = self.listener.accept() => {
                    let (stream, peer_addr) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(peer = %peer_addr, error = %e, "set_nodelay failed");
                    }
                    self.server
                        .accept(peer_addr.to_string(), Arc::new(StreamTransport::new(stream)));
                }
            }
        }
    }
}
