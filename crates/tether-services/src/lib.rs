//! The tether messaging core: pub/sub, correlation, chunking,
//! connectors, peer sessions, the multi-client server and the manager.

pub mod connector;
pub mod correlator;
pub mod link;
pub mod manager;
pub mod peer;
pub mod pipeline;
pub mod pubsub;
pub mod schema;
pub mod server;
pub mod split;
pub mod transport;

#[cfg(test)]
mod testing;

pub use connector::{split_messages, Connector, DEFAULT_SPLIT_DELAY};
pub use correlator::ResponseCorrelator;
pub use link::LinkConnector;
pub use manager::Manager;
pub use peer::{PeerSession, PeerState};
pub use pipeline::InboundPipeline;
pub use pubsub::{Publisher, Subscriber};
pub use server::{new_peer_table, PeerTable, Server};
pub use split::{split_payload, SplitReassembler, DEFAULT_MAX_CHUNKS, QUOTE_MARKER};
pub use transport::{StreamTransport, Transport, DEFAULT_MAX_FRAME_LEN};
