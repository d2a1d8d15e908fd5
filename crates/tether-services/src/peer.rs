//! Peer session: one accepted connection inside a [`Server`](crate::Server).
//!
//! Each session runs two tasks: an outbound drain loop that also probes the
//! transport for liveness, and an inbound loop that decodes frames and
//! publishes them to the owning server. The first I/O failure on either side
//! ends both and leaves the session `Disconnected` for good; a reconnecting
//! peer gets a fresh session.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};

use tether_core::{Error, Result, WireFormat};

use crate::pubsub::{Publisher, Subscriber};
use crate::schema;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerState {
    Connecting = 0,
    Connected = 1,
    Disconnected = 2,
}

impl PeerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

pub struct PeerSession {
    address: String,
    transport: Arc<dyn Transport>,
    state: AtomicU8,
    outbound_tx: mpsc::UnboundedSender<Bytes>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    publisher: Publisher,
    shutdown: broadcast::Sender<()>,
}

impl PeerSession {
    pub fn new(address: impl Into<String>, transport: Arc<dyn Transport>) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = broadcast::channel(1);
        Arc::new(Self {
            address: address.into(),
            transport,
            state: AtomicU8::new(PeerState::Connecting as u8),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            publisher: Publisher::new(),
            shutdown,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> PeerState {
        PeerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Connected and the transport agrees.
    pub fn is_connected(&self) -> bool {
        self.state() == PeerState::Connected && self.transport.is_connected()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> bool {
        self.publisher.subscribe(subscriber)
    }

    /// Spawn the I/O loops. Only the first call has any effect.
    pub fn start(self: &Arc<Self>, format: WireFormat, liveness: Duration) {
        let rx = match self.outbound_rx.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(rx) = rx else {
            tracing::debug!(peer = %self.address, "session already started");
            return;
        };
        if self
            .state
            .compare_exchange(
                PeerState::Connecting as u8,
                PeerState::Connected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            tracing::debug!(peer = %self.address, "session closed before start");
            return;
        }

        tokio::spawn(self.clone().outbound_loop(rx, liveness, self.shutdown.subscribe()));
        tokio::spawn(self.clone().inbound_loop(format, self.shutdown.subscribe()));
        tracing::info!(peer = %self.address, "peer session started");
    }

    /// Queue a frame for the outbound loop.
    pub fn enqueue(&self, frame: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::ClientDisconnected(self.address.clone()));
        }
        self.outbound_tx
            .send(frame)
            .map_err(|_| Error::ClientDisconnected(self.address.clone()))
    }

    /// Mark the session disconnected and stop both loops.
    pub fn close(&self) {
        let previous = self
            .state
            .swap(PeerState::Disconnected as u8, Ordering::AcqRel);
        if previous != PeerState::Disconnected as u8 {
            tracing::info!(peer = %self.address, "peer session closed");
        }
        let _ = self.shutdown.send(());
    }

    async fn outbound_loop(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<Bytes>,
        liveness: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut probe = tokio::time::interval(liveness);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,

                _ = probe.tick() => {
                    if !self.transport.is_connected() {
                        tracing::info!(peer = %self.address, "liveness probe failed");
                        break;
                    }
                }

                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    tracing::trace!(peer = %self.address, len = frame.len(), "frame sent");
                    if let Err(e) = self.transport.send(frame).await {
                        tracing::warn!(peer = %self.address, error = %e, "write failed");
                        break;
                    }
                }
            }
        }
        self.finish().await;
    }

    async fn inbound_loop(self: Arc<Self>, format: WireFormat, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,

                frame = self.transport.receive() => {
                    match frame {
                        Ok(Some(raw)) => {
                            if let Some(message) = schema::decode_frame(format, &raw, &self.address) {
                                self.publisher.publish(&message);
                            }
                        }
                        Ok(None) => {
                            tracing::info!(peer = %self.address, "peer closed connection");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(peer = %self.address, error = %e, "read failed");
                            break;
                        }
                    }
                }
            }
        }
        self.finish().await;
    }

    async fn finish(&self) {
        self.close();
        if let Err(e) = self.transport.disconnect().await {
            tracing::debug!(peer = %self.address, error = %e, "transport disconnect failed");
        }
    }
}
