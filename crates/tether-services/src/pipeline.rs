//! Inbound pipeline shared by every connector.
//!
//! decode → validate → not-for-me filter → bind responder → reassemble → publish

use tether_core::{Message, Responder, WireFormat};

use crate::pubsub::Publisher;
use crate::schema;
use crate::split::SplitReassembler;

pub struct InboundPipeline {
    hostname: String,
    reassembler: SplitReassembler,
    publisher: Publisher,
}

impl InboundPipeline {
    pub fn new(hostname: impl Into<String>, reassembler: SplitReassembler) -> Self {
        Self {
            hostname: hostname.into(),
            reassembler,
            publisher: Publisher::new(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn reassembler(&self) -> &SplitReassembler {
        &self.reassembler
    }

    /// Deliver an already decoded message. Returns how many subscribers saw it.
    pub fn deliver(&self, mut message: Message, responder: Option<Responder>) -> usize {
        if let Some(receiver) = message.receiver() {
            if receiver != self.hostname {
                tracing::debug!(
                    path = message.path(),
                    receiver,
                    "message addressed to another node, dropping"
                );
                return 0;
            }
        }
        if let Some(responder) = responder {
            message.set_responder(responder);
        }
        match self.reassembler.accept(message) {
            Some(message) => {
                tracing::debug!(
                    path = message.path(),
                    session_id = %message.session_id(),
                    sender = message.sender(),
                    is_response = message.is_response(),
                    "publishing inbound message"
                );
                self.publisher.publish(&message)
            }
            None => 0,
        }
    }

    /// Decode one raw frame and deliver it. Bad frames are logged and dropped.
    pub fn ingest(
        &self,
        format: WireFormat,
        raw: &[u8],
        source: &str,
        responder: Option<Responder>,
    ) -> usize {
        tracing::trace!(peer = source, len = raw.len(), "frame received");
        match schema::decode_frame(format, raw, source) {
            Some(message) => self.deliver(message, responder),
            None => 0,
        }
    }
}
