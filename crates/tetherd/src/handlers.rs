//! Built-in subscribers registered on every connector.

use std::sync::Arc;

use tether_core::Message;
use tether_services::Subscriber;

pub const PING_PATH: &str = "ping";

/// Answers `ping` requests with their own payload.
pub fn ping_responder() -> Arc<dyn Subscriber> {
    Arc::new(|message: &Message| {
        if message.path() != PING_PATH || message.is_response() {
            return;
        }
        if let Err(e) = message.respond(message.payload().clone(), None) {
            tracing::warn!(
                sender = message.sender(),
                session_id = %message.session_id(),
                error = %e,
                "ping reply failed"
            );
        }
    })
}

pub fn message_logger() -> Arc<dyn Subscriber> {
    Arc::new(|message: &Message| {
        tracing::info!(
            path = message.path(),
            session_id = %message.session_id(),
            sender = message.sender(),
            receiver = message.receiver().unwrap_or("*"),
            is_response = message.is_response(),
            "message"
        );
    })
}
