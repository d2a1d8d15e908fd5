//! Response correlation: pairs an outbound request with inbound replies.
//!
//! A correlator is created for one outstanding call. It subscribes to every
//! publisher the request went out on *before* the request is transmitted, so
//! a reply that arrives immediately is never missed. Dropping the correlator
//! unsubscribes it, which covers completion, timeout and cancellation of the
//! waiting task alike.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use tether_core::Message;

use crate::pubsub::{Publisher, Subscriber};

/// Forwards replies to the waiting call. Never blocks the publisher.
struct MatchQueue {
    request: Message,
    tx: mpsc::UnboundedSender<Message>,
}

impl Subscriber for MatchQueue {
    fn on_message(&self, message: &Message) {
        if message.correlates_with(&self.request) {
            // The receiver only goes away once the correlator is dropped.
            let _ = self.tx.send(message.clone());
        }
    }
}

pub struct ResponseCorrelator {
    subscriber: Arc<dyn Subscriber>,
    publishers: Vec<Publisher>,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl ResponseCorrelator {
    /// Start listening for replies to `request` on every given publisher.
    pub fn attach<'a>(
        request: &Message,
        publishers: impl IntoIterator<Item = &'a Publisher>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber: Arc<dyn Subscriber> = Arc::new(MatchQueue {
            request: request.clone(),
            tx,
        });
        let publishers: Vec<Publisher> = publishers.into_iter().cloned().collect();
        for publisher in &publishers {
            publisher.subscribe(subscriber.clone());
        }
        Self {
            subscriber,
            publishers,
            rx,
        }
    }

    /// Collect replies until `max_count` have arrived or `timeout` elapses.
    ///
    /// `None` collects until the deadline. An empty result means nobody
    /// answered in time; it is not an error. A timeout too large to form a
    /// deadline waits without one.
    pub async fn wait(mut self, timeout: Duration, max_count: Option<usize>) -> Vec<Message> {
        let deadline = Instant::now().checked_add(timeout);
        let mut replies = Vec::new();

        while max_count.map_or(true, |max| replies.len() < max) {
            let next = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, self.rx.recv()).await,
                None => Ok(self.rx.recv().await),
            };
            match next {
                Ok(Some(reply)) => {
                    tracing::debug!(
                        session_id = %reply.session_id(),
                        sender = reply.sender(),
                        "correlated reply"
                    );
                    replies.push(reply);
                }
                Ok(None) | Err(_) => break,
            }
        }
        replies
    }
}

impl Drop for ResponseCorrelator {
    fn drop(&mut self) {
        for publisher in &self.publishers {
            publisher.unsubscribe(&self.subscriber);
        }
    }
}
