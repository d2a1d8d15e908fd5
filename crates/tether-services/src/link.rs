//! Single-link connector: one transport, one remote endpoint.
//!
//! Used for uplinks the node dials itself and for serial devices. Inbound
//! frames are read by [`LinkConnector::run`], which must be spawned once.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use tether_core::config::MessagingConfig;
use tether_core::{Error, Message, ReplySink, Responder, Result, WireFormat};

use crate::connector::{Connector, DEFAULT_SPLIT_DELAY};
use crate::pipeline::InboundPipeline;
use crate::pubsub::Publisher;
use crate::split::SplitReassembler;
use crate::transport::Transport;

pub struct LinkConnector {
    label: String,
    format: WireFormat,
    transport: Arc<dyn Transport>,
    pipeline: InboundPipeline,
    split_delay: Duration,
}

impl LinkConnector {
    /// `label` names the remote end in logs, usually its address or device path.
    pub fn new(
        hostname: impl Into<String>,
        label: impl Into<String>,
        format: WireFormat,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            label: label.into(),
            format,
            transport,
            pipeline: InboundPipeline::new(hostname, SplitReassembler::default()),
            split_delay: DEFAULT_SPLIT_DELAY,
        }
    }

    /// Apply chunk pacing and reassembly limits. Call before anything subscribes.
    pub fn configure(mut self, messaging: &MessagingConfig) -> Self {
        self.pipeline = InboundPipeline::new(
            self.pipeline.hostname(),
            SplitReassembler::from_config(messaging),
        );
        self.split_delay = messaging.chunk_delay();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    fn responder(&self) -> Responder {
        Responder::new(
            self.pipeline.hostname(),
            Arc::new(LinkSink {
                label: self.label.clone(),
                format: self.format,
                transport: self.transport.clone(),
            }),
        )
    }

    /// Read frames until the link closes or shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let responder = self.responder();
        tracing::info!(link = %self.label, format = ?self.format, "link receive loop started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(link = %self.label, "link receive loop shutting down");
                    if let Err(e) = self.transport.disconnect().await {
                        tracing::debug!(link = %self.label, error = %e, "disconnect failed");
                    }
                    return Ok(());
                }

                frame = self.transport.receive() => {
                    let frame = frame.with_context(|| format!("receive from {} failed", self.label))?;
                    match frame {
                        Some(raw) => {
                            self.pipeline.ingest(self.format, &raw, &self.label, Some(responder.clone()));
                        }
                        None => bail!("link {} closed by remote", self.label),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Connector for LinkConnector {
    fn hostname(&self) -> &str {
        self.pipeline.hostname()
    }

    fn publisher(&self) -> &Publisher {
        self.pipeline.publisher()
    }

    async fn transmit(&self, message: &Message) -> Result<()> {
        if !self.transport.is_connected() {
            return Err(Error::ClientDisconnected(self.label.clone()));
        }
        let line = self.format.encode(message)?;
        tracing::debug!(
            link = %self.label,
            path = message.path(),
            session_id = %message.session_id(),
            "transmitting"
        );
        self.transport.send(Bytes::from(line)).await
    }

    fn split_delay(&self) -> Duration {
        self.split_delay
    }
}

/// Writes replies back over the link they were requested on.
struct LinkSink {
    label: String,
    format: WireFormat,
    transport: Arc<dyn Transport>,
}

impl ReplySink for LinkSink {
    fn reply(&self, message: Message) -> Result<()> {
        if !self.transport.is_connected() {
            return Err(Error::ClientDisconnected(self.label.clone()));
        }
        let line = self.format.encode(&message)?;
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Transport(format!("no runtime for reply: {e}")))?;
        let transport = self.transport.clone();
        let label = self.label.clone();
        handle.spawn(async move {
            if let Err(e) = transport.send(Bytes::from(line)).await {
                tracing::warn!(link = %label, error = %e, "reply write failed");
            }
        });
        Ok(())
    }
}
