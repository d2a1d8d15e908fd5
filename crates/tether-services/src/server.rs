//! Multi-client server: many peer sessions behind one connector.
//!
//! The server owns the peer table. Inbound traffic from every session is
//! funnelled through one pipeline, so subscribers and correlators see a single
//! stream. Outbound traffic goes to every connected peer; addressing is left
//! to the receiving side's not-for-me filter.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;

use tether_core::config::{MessagingConfig, ServerConfig};
use tether_core::{Error, Message, ReplySink, Responder, Result, WireFormat};

use crate::connector::{Connector, DEFAULT_SPLIT_DELAY};
use crate::peer::PeerSession;
use crate::pipeline::InboundPipeline;
use crate::pubsub::Publisher;
use crate::split::SplitReassembler;
use crate::transport::Transport;

/// Peer sessions keyed by remote address. At most one session per address.
pub type PeerTable = Arc<DashMap<String, Arc<PeerSession>>>;

pub fn new_peer_table() -> PeerTable {
    Arc::new(DashMap::new())
}

pub struct Server {
    format: WireFormat,
    liveness: Duration,
    split_delay: Duration,
    peers: PeerTable,
    pipeline: Arc<InboundPipeline>,
    responder: Responder,
}

impl Server {
    pub fn new(hostname: impl Into<String>, format: WireFormat) -> Self {
        let hostname = hostname.into();
        let peers = new_peer_table();
        let responder = Responder::new(
            hostname.clone(),
            Arc::new(FanOutSink {
                peers: Arc::downgrade(&peers),
                format,
            }),
        );
        Self {
            format,
            liveness: ServerConfig::default().liveness_interval(),
            split_delay: DEFAULT_SPLIT_DELAY,
            peers,
            pipeline: Arc::new(InboundPipeline::new(hostname, SplitReassembler::default())),
            responder,
        }
    }

    /// Apply timing settings. Call before accepting peers.
    pub fn configure(mut self, messaging: &MessagingConfig, server: &ServerConfig) -> Self {
        self.pipeline = Arc::new(InboundPipeline::new(
            self.pipeline.hostname(),
            SplitReassembler::from_config(messaging),
        ));
        self.split_delay = messaging.chunk_delay();
        self.liveness = server.liveness_interval();
        self
    }

    /// Register a freshly accepted connection and start its loops.
    ///
    /// A session already registered under `address` is closed and replaced.
    pub fn accept(&self, address: impl Into<String>, transport: Arc<dyn Transport>) -> Arc<PeerSession> {
        let address = address.into();
        let session = PeerSession::new(address.clone(), transport);

        let pipeline = self.pipeline.clone();
        let responder = self.responder.clone();
        session.subscribe(Arc::new(move |message: &Message| {
            pipeline.deliver(message.clone(), Some(responder.clone()));
        }));

        if let Some(previous) = self.peers.insert(address.clone(), session.clone()) {
            tracing::info!(peer = %address, "replacing existing session for address");
            previous.close();
        }
        session.start(self.format, self.liveness);
        tracing::info!(peer = %address, peers = self.peers.len(), "peer accepted");
        session
    }

    /// Close and forget the session at `address`.
    pub fn remove_client(&self, address: &str) -> bool {
        match self.peers.remove(address) {
            Some((_, session)) => {
                session.close();
                tracing::info!(peer = address, "peer removed");
                true
            }
            None => false,
        }
    }

    /// Drop every session that is no longer connected. Returns how many went.
    pub fn sweep(&self) -> usize {
        let dead: Vec<String> = self
            .peers
            .iter()
            .filter(|entry| !entry.value().is_connected())
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for address in dead {
            // Re-check: the address may have been re-accepted meanwhile.
            if self
                .peers
                .remove_if(&address, |_, session| !session.is_connected())
                .is_some()
            {
                tracing::warn!(peer = %address, "evicting disconnected peer");
                removed += 1;
            }
        }
        removed
    }

    /// Run [`sweep`](Self::sweep) every `interval` until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("peer sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        tracing::info!(removed, remaining = self.peers.len(), "peer sweep");
                    }
                }
            }
        }
    }

    /// Close every session, e.g. on daemon shutdown.
    pub fn close_all(&self) {
        for entry in self.peers.iter() {
            entry.value().close();
        }
        self.peers.clear();
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn connected_count(&self) -> usize {
        self.peers.iter().filter(|e| e.value().is_connected()).count()
    }

    pub fn peer(&self, address: &str) -> Option<Arc<PeerSession>> {
        self.peers.get(address).map(|e| e.value().clone())
    }

    pub fn reassembly_pending(&self) -> usize {
        self.pipeline.reassembler().pending()
    }
}

/// Enqueue one encoded frame on every connected peer. Returns how many took it.
fn fan_out(peers: &DashMap<String, Arc<PeerSession>>, frame: &Bytes) -> usize {
    let mut delivered = 0;
    for entry in peers.iter() {
        let session = entry.value();
        if !session.is_connected() {
            continue;
        }
        match session.enqueue(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(e) => tracing::warn!(peer = session.address(), error = %e, "enqueue failed"),
        }
    }
    delivered
}

#[async_trait]
impl Connector for Server {
    fn hostname(&self) -> &str {
        self.pipeline.hostname()
    }

    fn publisher(&self) -> &Publisher {
        self.pipeline.publisher()
    }

    async fn transmit(&self, message: &Message) -> Result<()> {
        let frame = Bytes::from(self.format.encode(message)?);
        let delivered = fan_out(&self.peers, &frame);
        tracing::debug!(
            path = message.path(),
            session_id = %message.session_id(),
            delivered,
            "server fan-out"
        );
        Ok(())
    }

    fn split_delay(&self) -> Duration {
        self.split_delay
    }
}

/// Replies go out like any other server message: to every connected peer.
///
/// Holds the table weakly; sessions own subscribers that own this sink.
struct FanOutSink {
    peers: Weak<DashMap<String, Arc<PeerSession>>>,
    format: WireFormat,
}

impl ReplySink for FanOutSink {
    fn reply(&self, message: Message) -> Result<()> {
        let peers = self
            .peers
            .upgrade()
            .ok_or_else(|| Error::ClientDisconnected("server stopped".into()))?;
        let frame = Bytes::from(self.format.encode(&message)?);
        if fan_out(&peers, &frame) == 0 {
            tracing::debug!(path = message.path(), "reply dropped, no connected peers");
        }
        Ok(())
    }
}
