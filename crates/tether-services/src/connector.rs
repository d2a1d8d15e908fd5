//! The transport-agnostic connector contract.
//!
//! A connector only has to know how to put one message on its transport
//! (`transmit`) and where it publishes inbound traffic (`publisher`). Unicast,
//! broadcast and split sends are built on top of those two and shared by
//! every implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tether_core::{Message, Payload, Result, SessionId};

use crate::correlator::ResponseCorrelator;
use crate::pubsub::{Publisher, Subscriber};
use crate::split::split_payload;

/// Pause between fire-and-forget chunks of a split send.
pub const DEFAULT_SPLIT_DELAY: Duration = Duration::from_millis(50);

#[async_trait]
pub trait Connector: Send + Sync {
    /// Sender of every message this connector builds.
    fn hostname(&self) -> &str;

    /// Inbound messages addressed to this node, after reassembly.
    fn publisher(&self) -> &Publisher;

    /// Put one message on the transport. Transport failures are returned,
    /// never retried.
    async fn transmit(&self, message: &Message) -> Result<()>;

    fn split_delay(&self) -> Duration {
        DEFAULT_SPLIT_DELAY
    }

    fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> bool {
        self.publisher().subscribe(subscriber)
    }

    fn unsubscribe(&self, subscriber: &Arc<dyn Subscriber>) -> bool {
        self.publisher().unsubscribe(subscriber)
    }

    /// Transmit an already built message and collect replies.
    ///
    /// A zero timeout is fire-and-forget: no correlator is created and the
    /// result is always empty.
    async fn request(
        &self,
        message: Message,
        timeout: Duration,
        max_responses: Option<usize>,
    ) -> Result<Vec<Message>> {
        if timeout.is_zero() {
            self.transmit(&message).await?;
            return Ok(Vec::new());
        }
        let correlator = ResponseCorrelator::attach(&message, [self.publisher()]);
        self.transmit(&message).await?;
        Ok(correlator.wait(timeout, max_responses).await)
    }

    /// Send to one receiver and return its first reply, if any.
    async fn send(
        &self,
        path: &str,
        receiver: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Option<Message>> {
        let message = Message::new(path, self.hostname(), Some(receiver.to_string()), payload)?;
        Ok(self.request(message, timeout, Some(1)).await?.into_iter().next())
    }

    /// Send to every listener and collect replies until `max_responses` or
    /// the timeout.
    async fn broadcast(
        &self,
        path: &str,
        payload: Payload,
        timeout: Duration,
        max_responses: Option<usize>,
    ) -> Result<Vec<Message>> {
        let message = Message::new(path, self.hostname(), None, payload)?;
        self.request(message, timeout, max_responses).await
    }

    /// Send `payload` in chunks of `chunk_size` characters.
    ///
    /// All chunks but the last go out fire-and-forget, `split_delay` apart.
    /// The last one carries the timeout and its reply is the result.
    async fn send_split(
        &self,
        path: &str,
        receiver: Option<&str>,
        payload: Payload,
        chunk_size: usize,
        timeout: Duration,
    ) -> Result<Option<Message>> {
        let mut chunks = split_messages(path, self.hostname(), receiver, &payload, chunk_size)?;
        let Some(last) = chunks.pop() else {
            return Ok(None);
        };
        for chunk in &chunks {
            self.transmit(chunk).await?;
            tokio::time::sleep(self.split_delay()).await;
        }
        Ok(self.request(last, timeout, Some(1)).await?.into_iter().next())
    }
}

/// Build the chunk messages of one split send. They share a fresh session id.
pub fn split_messages(
    path: &str,
    sender: &str,
    receiver: Option<&str>,
    payload: &Payload,
    chunk_size: usize,
) -> Result<Vec<Message>> {
    let session_id = SessionId::random();
    split_payload(payload, chunk_size)?
        .into_iter()
        .map(|chunk| -> Result<Message> {
            let message =
                Message::new(path, sender, receiver.map(str::to_string), chunk.to_payload())?;
            Ok(message.with_session_id(session_id))
        })
        .collect()
}
