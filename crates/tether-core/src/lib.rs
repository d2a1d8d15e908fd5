//! tether-core: message model, wire framing, errors and configuration.
//! All other Tether crates depend on this one.

pub mod config;
pub mod error;
pub mod message;
pub mod wire;

pub use error::{Error, Result};
pub use message::{
    to_payload, AuthTag, Envelope, Message, Payload, ReplySink, Responder, SessionId,
};
pub use wire::{ChunkEnvelope, Frame, FrameError, WireFormat};
