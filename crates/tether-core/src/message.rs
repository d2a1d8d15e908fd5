//! Request/response message model.
//!
//! A `Message` is immutable once built. The only late-bound part is the
//! responder, which the receiving connector attaches before publishing so
//! that business logic can call `message.respond(..)` without knowing which
//! transport the request came in on.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Ordered key/value payload carried by every message.
pub type Payload = Map<String, Value>;

/// Correlates a request with its response(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl SessionId {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SessionId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Credential or attestation tag. Opaque to the messaging core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthTag(pub String);

/// Where replies built by [`Message::respond`] are handed off.
///
/// Implementations must not block: connectors enqueue or spawn the write.
pub trait ReplySink: Send + Sync {
    fn reply(&self, message: Message) -> Result<()>;
}

/// Reply capability bound onto a received message.
#[derive(Clone)]
pub struct Responder {
    hostname: String,
    sink: Arc<dyn ReplySink>,
}

impl Responder {
    /// `hostname` becomes the sender of every reply sent through this responder.
    pub fn new(hostname: impl Into<String>, sink: Arc<dyn ReplySink>) -> Self {
        Self {
            hostname: hostname.into(),
            sink,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

/// Transport-independent wire envelope. The path travels in the framing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub session_id: SessionId,
    pub sender: String,
    #[serde(default)]
    pub receiver: Option<String>,
    pub payload: Payload,
    pub is_response: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthTag>,
}

/// A request or response travelling through the bridge.
#[derive(Clone)]
pub struct Message {
    path: String,
    session_id: SessionId,
    sender: String,
    receiver: Option<String>,
    payload: Payload,
    is_response: bool,
    auth: Option<AuthTag>,
    responder: Option<Responder>,
}

impl Message {
    /// Build a fresh request with a random session id.
    ///
    /// `receiver = None` addresses every listener.
    pub fn new(
        path: impl Into<String>,
        sender: impl Into<String>,
        receiver: Option<String>,
        payload: Payload,
    ) -> Result<Self> {
        let path = path.into();
        let sender = sender.into();
        if path.is_empty() {
            return Err(Error::InvalidMessage("path must not be empty".into()));
        }
        if sender.is_empty() {
            return Err(Error::InvalidMessage("sender must not be empty".into()));
        }
        Ok(Self {
            path,
            session_id: SessionId::random(),
            sender,
            receiver,
            payload,
            is_response: false,
            auth: None,
            responder: None,
        })
    }

    /// Rebuild a message from a decoded envelope.
    pub fn from_envelope(path: impl Into<String>, envelope: Envelope) -> Result<Self> {
        let message = Self::new(path, envelope.sender, envelope.receiver, envelope.payload)?;
        Ok(Self {
            session_id: envelope.session_id,
            is_response: envelope.is_response,
            auth: envelope.auth,
            ..message
        })
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            session_id: self.session_id,
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            payload: self.payload.clone(),
            is_response: self.is_response,
            auth: self.auth.clone(),
        }
    }

    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_auth(mut self, auth: AuthTag) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn as_response(mut self) -> Self {
        self.is_response = true;
        self
    }

    /// Same routing metadata, different payload. Used when a chunked message
    /// is collapsed back into its logical payload.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> Option<&str> {
        self.receiver.as_deref()
    }

    pub fn is_broadcast(&self) -> bool {
        self.receiver.is_none()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn is_response(&self) -> bool {
        self.is_response
    }

    pub fn auth(&self) -> Option<&AuthTag> {
        self.auth.as_ref()
    }

    /// True if `self` answers `request`: same session, different sender.
    ///
    /// A node that shares the requester's hostname can never be matched,
    /// even when it legitimately replies through a loopback transport.
    pub fn correlates_with(&self, request: &Message) -> bool {
        self.session_id == request.session_id && self.sender != request.sender
    }

    pub fn responder(&self) -> Option<&Responder> {
        self.responder.as_ref()
    }

    pub fn set_responder(&mut self, responder: Responder) {
        self.responder = Some(responder);
    }

    /// Reply to this message through the connector it arrived on.
    ///
    /// The reply reuses the session id, is addressed to the original sender
    /// and keeps the request path unless `path` overrides it.
    pub fn respond(&self, payload: Payload, path: Option<&str>) -> Result<()> {
        let responder = self.responder.as_ref().ok_or(Error::NoResponseHandler)?;
        let reply = Message::new(
            path.unwrap_or(&self.path),
            responder.hostname(),
            Some(self.sender.clone()),
            payload,
        )?
        .with_session_id(self.session_id)
        .as_response();
        responder.sink.reply(reply)
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.session_id == other.session_id
            && self.sender == other.sender
            && self.receiver == other.receiver
            && self.payload == other.payload
            && self.is_response == other.is_response
            && self.auth == other.auth
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("path", &self.path)
            .field("session_id", &self.session_id)
            .field("sender", &self.sender)
            .field("receiver", &self.receiver)
            .field("payload", &self.payload)
            .field("is_response", &self.is_response)
            .field("auth", &self.auth)
            .field("responder", &self.responder.is_some())
            .finish()
    }
}

/// Convert a JSON value into a payload map. Only objects are accepted.
pub fn to_payload(value: Value) -> Result<Payload> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidMessage(format!(
            "payload must be a JSON object, got {other}"
        ))),
    }
}
