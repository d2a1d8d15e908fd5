//! In-memory connector for unit tests.

use std::sync::Mutex;

use async_trait::async_trait;

use tether_core::{Error, Message, Result};

use crate::connector::Connector;
use crate::pubsub::Publisher;

/// Records every transmitted message and, if it has a peer name, publishes
/// an echo reply from that peer.
pub struct EchoConnector {
    hostname: String,
    peer: Option<String>,
    failing: bool,
    publisher: Publisher,
    sent: Mutex<Vec<Message>>,
}

impl EchoConnector {
    pub fn new(hostname: &str, peer: &str) -> Self {
        Self::build(hostname, Some(peer.to_string()), false)
    }

    /// Never answers.
    pub fn silent(hostname: &str) -> Self {
        Self::build(hostname, None, false)
    }

    /// Every transmit fails.
    pub fn failing(hostname: &str) -> Self {
        Self::build(hostname, None, true)
    }

    fn build(hostname: &str, peer: Option<String>, failing: bool) -> Self {
        Self {
            hostname: hostname.to_string(),
            peer,
            failing,
            publisher: Publisher::new(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for EchoConnector {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    async fn transmit(&self, message: &Message) -> Result<()> {
        if self.failing {
            return Err(Error::Transport("link down".into()));
        }
        self.sent.lock().unwrap().push(message.clone());

        if let (Some(peer), false) = (&self.peer, message.is_response()) {
            let reply = Message::new(
                message.path(),
                peer.as_str(),
                Some(message.sender().to_string()),
                message.payload().clone(),
            )?
            .with_session_id(message.session_id())
            .as_response();
            self.publisher.publish(&reply);
        }
        Ok(())
    }
}
