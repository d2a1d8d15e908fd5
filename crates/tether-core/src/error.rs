//! Error taxonomy shared by every Tether crate.
//!
//! Contract errors are raised synchronously to the immediate caller and are
//! never swallowed. Malformed inbound data is not an error at this level: the
//! inbound boundary logs and drops it, and a missing reply surfaces as an
//! empty result rather than an `Err`.

/// Errors surfaced to callers of the messaging API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A message was constructed with an empty path or sender.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// `respond()` was called on a message that was never received through a connector.
    #[error("message has no response handler bound")]
    NoResponseHandler,

    /// A connector with a different hostname was added to a manager.
    #[error("inconsistent hostname: manager is {expected:?}, connector reports {found:?}")]
    InconsistentHostname { expected: String, found: String },

    /// A send was attempted on a manager with zero connectors.
    #[error("no connectors registered")]
    NoConnectors,

    /// The peer or link behind a send is gone.
    #[error("client disconnected: {0}")]
    ClientDisconnected(String),

    /// A timeout was negative or not a finite number of seconds.
    #[error("invalid timeout: {0}s")]
    InvalidTimeout(f64),

    /// The underlying transport rejected an outbound frame.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inconsistent_hostname_names_both_sides() {
        let err = Error::InconsistentHostname {
            expected: "hub".into(),
            found: "attic".into(),
        };
        let text = err.to_string();
        assert!(text.contains("\"hub\""));
        assert!(text.contains("\"attic\""));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
