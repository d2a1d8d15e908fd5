//! Manager: several connectors behind one hostname.
//!
//! Every send goes out through every connector and one correlator listens on
//! all of them at once, so a broadcast over MQTT, a server and a serial link
//! returns the replies of all three. Each connector send is independent and
//! best-effort: a failing connector is logged and the others still go out.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use tether_core::config::MessagingConfig;
use tether_core::{Error, Message, Payload, Result};

use crate::connector::{split_messages, Connector, DEFAULT_SPLIT_DELAY};
use crate::correlator::ResponseCorrelator;
use crate::pubsub::Subscriber;

pub struct Manager {
    hostname: String,
    connectors: Vec<Arc<dyn Connector>>,
    subscribers: Vec<Arc<dyn Subscriber>>,
    default_timeout: Duration,
    chunk_size: usize,
    split_delay: Duration,
}

impl Manager {
    pub fn new(hostname: impl Into<String>) -> Self {
        let defaults = MessagingConfig::default();
        Self {
            hostname: hostname.into(),
            connectors: Vec::new(),
            subscribers: Vec::new(),
            default_timeout: Duration::from_secs_f64(defaults.default_timeout_secs),
            chunk_size: defaults.chunk_size,
            split_delay: DEFAULT_SPLIT_DELAY,
        }
    }

    pub fn configure(mut self, messaging: &MessagingConfig) -> Result<Self> {
        self.set_default_timeout(messaging.default_timeout_secs)?;
        self.chunk_size = messaging.chunk_size.max(1);
        self.split_delay = messaging.chunk_delay();
        Ok(self)
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Add a connector. Its hostname must match the manager's.
    ///
    /// Subscribers already registered on the manager are attached to it.
    pub fn add_connector(&mut self, connector: Arc<dyn Connector>) -> Result<()> {
        if connector.hostname() != self.hostname {
            return Err(Error::InconsistentHostname {
                expected: self.hostname.clone(),
                found: connector.hostname().to_string(),
            });
        }
        for subscriber in &self.subscribers {
            connector.subscribe(subscriber.clone());
        }
        self.connectors.push(connector);
        tracing::info!(hostname = %self.hostname, connectors = self.connectors.len(), "connector added");
        Ok(())
    }

    pub fn connector_count(&self) -> usize {
        self.connectors.len()
    }

    /// Register a subscriber on every current and future connector.
    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>) {
        for connector in &self.connectors {
            connector.subscribe(subscriber.clone());
        }
        self.subscribers.push(subscriber);
    }

    /// Timeout used when callers pass `None`. Negative, non-finite and
    /// out-of-range values are rejected.
    pub fn set_default_timeout(&mut self, secs: f64) -> Result<()> {
        if secs < 0.0 {
            return Err(Error::InvalidTimeout(secs));
        }
        self.default_timeout =
            Duration::try_from_secs_f64(secs).map_err(|_| Error::InvalidTimeout(secs))?;
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub async fn send(
        &self,
        path: &str,
        receiver: &str,
        payload: Payload,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>> {
        self.ensure_connectors()?;
        let message = Message::new(path, self.hostname.as_str(), Some(receiver.to_string()), payload)?;
        Ok(self.dispatch(message, timeout, Some(1)).await.into_iter().next())
    }

    pub async fn broadcast(
        &self,
        path: &str,
        payload: Payload,
        timeout: Option<Duration>,
        max_responses: Option<usize>,
    ) -> Result<Vec<Message>> {
        self.ensure_connectors()?;
        let message = Message::new(path, self.hostname.as_str(), None, payload)?;
        Ok(self.dispatch(message, timeout, max_responses).await)
    }

    /// Chunked send through every connector; the final chunk's reply is returned.
    ///
    /// `chunk_size` overrides the configured size for this call.
    pub async fn send_split(
        &self,
        path: &str,
        receiver: Option<&str>,
        payload: Payload,
        chunk_size: Option<usize>,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>> {
        self.ensure_connectors()?;
        let chunk_size = chunk_size.unwrap_or(self.chunk_size).max(1);
        let mut chunks = split_messages(path, &self.hostname, receiver, &payload, chunk_size)?;
        let Some(last) = chunks.pop() else {
            return Ok(None);
        };
        for chunk in &chunks {
            self.transmit_all(chunk).await;
            tokio::time::sleep(self.split_delay).await;
        }
        Ok(self.dispatch(last, timeout, Some(1)).await.into_iter().next())
    }

    fn ensure_connectors(&self) -> Result<()> {
        if self.connectors.is_empty() {
            return Err(Error::NoConnectors);
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        message: Message,
        timeout: Option<Duration>,
        max_responses: Option<usize>,
    ) -> Vec<Message> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let correlator = (!timeout.is_zero()).then(|| {
            ResponseCorrelator::attach(&message, self.connectors.iter().map(|c| c.publisher()))
        });

        self.transmit_all(&message).await;

        match correlator {
            Some(correlator) => correlator.wait(timeout, max_responses).await,
            None => Vec::new(),
        }
    }

    async fn transmit_all(&self, message: &Message) {
        let results = join_all(self.connectors.iter().map(|c| c.transmit(message))).await;
        for (connector, result) in self.connectors.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(
                    path = message.path(),
                    session_id = %message.session_id(),
                    connector = connector.hostname(),
                    error = %e,
                    "connector send failed"
                );
            }
        }
    }
}
