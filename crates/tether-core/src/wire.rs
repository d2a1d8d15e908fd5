//! Tether wire format: line framing for every transport.
//!
//! Two framings carry the same JSON envelope:
//!
//! ```text
//! socket:  {"path": "<path>", "body": <envelope>}\n
//! serial:  !r_p[<path>]_b[<envelope>]_\n
//! ```
//!
//! Serial links share the line with device console output, so the serial
//! decoder classifies lines instead of failing on them: anything not starting
//! with `!r_` is noise, and `Backtrace: 0x…` is a crash report from the peer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{Envelope, Message, Payload};

/// Every serial frame starts with this marker.
pub const SERIAL_PREFIX: &str = "!r_";

/// A device panic dump starts with this.
pub const CRASH_PREFIX: &str = "Backtrace: 0x";

const SERIAL_PATH_OPEN: &str = "!r_p[";
const SERIAL_BODY_SEP: &str = "]_b[";
const SERIAL_CLOSE: &str = "]_";

// ── Framing ──────────────────────────────────────────────────────────────────

/// How a connector frames envelopes on its transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Socket,
    Serial,
}

/// One decoded line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A message frame. `body` is still untyped; validate before use.
    Message { path: String, body: Value },
    /// The peer reported a crash. Logged, never forwarded.
    Crash(String),
    /// Console output or blank line.
    Noise,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("frame body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct SocketFrameOut<'a> {
    path: &'a str,
    body: &'a Envelope,
}

#[derive(Deserialize)]
struct SocketFrameIn {
    path: String,
    body: Value,
}

impl WireFormat {
    /// Encode a message as one newline-terminated line.
    pub fn encode(&self, message: &Message) -> Result<String, serde_json::Error> {
        let envelope = message.to_envelope();
        match self {
            Self::Socket => {
                let mut line = serde_json::to_string(&SocketFrameOut {
                    path: message.path(),
                    body: &envelope,
                })?;
                line.push('\n');
                Ok(line)
            }
            Self::Serial => {
                let body = serde_json::to_string(&envelope)?;
                Ok(format!(
                    "{SERIAL_PATH_OPEN}{}{SERIAL_BODY_SEP}{body}{SERIAL_CLOSE}\n",
                    message.path()
                ))
            }
        }
    }

    /// Decode one line (with or without its trailing newline).
    pub fn decode(&self, line: &str) -> Result<Frame, FrameError> {
        let line = line.trim_end_matches(['\n', '\r']);
        match self {
            Self::Socket => {
                if line.trim().is_empty() {
                    return Ok(Frame::Noise);
                }
                let frame: SocketFrameIn = serde_json::from_str(line)?;
                Ok(Frame::Message {
                    path: frame.path,
                    body: frame.body,
                })
            }
            Self::Serial => decode_serial(line),
        }
    }
}

fn decode_serial(line: &str) -> Result<Frame, FrameError> {
    if line.starts_with(CRASH_PREFIX) {
        return Ok(Frame::Crash(line.to_string()));
    }
    if !line.starts_with(SERIAL_PREFIX) {
        return Ok(Frame::Noise);
    }

    let rest = line
        .strip_prefix(SERIAL_PATH_OPEN)
        .ok_or(FrameError::Malformed("missing path marker"))?;
    let (path, body) = rest
        .split_once(SERIAL_BODY_SEP)
        .ok_or(FrameError::Malformed("missing body marker"))?;
    let body = body
        .strip_suffix(SERIAL_CLOSE)
        .ok_or(FrameError::Malformed("missing frame terminator"))?;

    Ok(Frame::Message {
        path: path.to_string(),
        body: serde_json::from_str(body)?,
    })
}

// ── Chunk envelope ───────────────────────────────────────────────────────────

/// One fragment of a payload that was too large for a single frame.
///
/// Carried as the `payload` of an otherwise ordinary message. Only the first
/// fragment of a session carries `last_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEnvelope {
    pub package_index: u32,
    pub split_payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_index: Option<u32>,
}

impl ChunkEnvelope {
    /// True if the payload has the chunk shape.
    pub fn is_chunk(payload: &Payload) -> bool {
        payload.contains_key("package_index") && payload.contains_key("split_payload")
    }

    pub fn from_payload(payload: &Payload) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(payload.clone()))
    }

    pub fn to_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("package_index".into(), self.package_index.into());
        payload.insert("split_payload".into(), self.split_payload.clone().into());
        if let Some(last) = self.last_index {
            payload.insert("last_index".into(), last.into());
        }
        payload
    }
}
