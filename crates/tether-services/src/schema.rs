//! Schema validation: ensures inbound frames carry a well-formed envelope.
//!
//! This is the inbound boundary: nothing here returns an error to a caller.
//! Frames that fail decoding or validation are logged and dropped so a
//! single bad frame never takes down a receive loop.

use anyhow::{bail, Context, Result};
use serde_json::Value;

use tether_core::{Envelope, Frame, Message, WireFormat};

/// Validate an envelope body before typed decoding.
pub fn validate_envelope(body: &Value) -> Result<()> {
    let obj = body.as_object().context("envelope must be a JSON object")?;

    let session_id = obj.get("session_id").context("missing session_id")?;
    match session_id.as_u64() {
        Some(id) if id <= u64::from(u32::MAX) => {}
        Some(id) => bail!("session_id {id} out of range"),
        None => bail!("session_id must be an unsigned integer, got {session_id}"),
    }

    match obj.get("sender") {
        Some(Value::String(s)) if !s.is_empty() => {}
        Some(Value::String(_)) => bail!("sender must not be empty"),
        Some(other) => bail!("sender must be a string, got {other}"),
        None => bail!("missing sender"),
    }

    match obj.get("receiver") {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(other) => bail!("receiver must be a string or null, got {other}"),
    }

    match obj.get("payload") {
        Some(Value::Object(_)) => {}
        Some(other) => bail!("payload must be an object, got {other}"),
        None => bail!("missing payload"),
    }

    match obj.get("is_response") {
        Some(Value::Bool(_)) => {}
        Some(other) => bail!("is_response must be a bool, got {other}"),
        None => bail!("missing is_response"),
    }

    Ok(())
}

/// Decode one raw line into a message. Logs and returns `None` on anything
/// that is not a valid message frame.
pub fn decode_frame(format: WireFormat, raw: &[u8], source: &str) -> Option<Message> {
    let line = match std::str::from_utf8(raw) {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!(peer = source, error = %e, "frame is not UTF-8, discarding");
            return None;
        }
    };

    let (path, body) = match format.decode(line) {
        Ok(Frame::Message { path, body }) => (path, body),
        Ok(Frame::Crash(report)) => {
            tracing::error!(peer = source, report = %report, "peer reported a crash");
            return None;
        }
        Ok(Frame::Noise) => {
            tracing::trace!(peer = source, len = raw.len(), "non-frame line ignored");
            return None;
        }
        Err(e) => {
            tracing::warn!(peer = source, error = %e, "undecodable frame, discarding");
            return None;
        }
    };

    if let Err(e) = validate_envelope(&body) {
        tracing::warn!(peer = source, path = %path, error = %e, "frame failed envelope validation, discarding");
        return None;
    }

    let envelope: Envelope = match serde_json::from_value(body) {
        Ok(env) => env,
        Err(e) => {
            tracing::warn!(peer = source, path = %path, error = %e, "envelope decode failed, discarding");
            return None;
        }
    };

    match Message::from_envelope(path, envelope) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::warn!(peer = source, error = %e, "invalid message, discarding");
            None
        }
    }
}
