//! Split send and reassembly for payloads too large for one frame.
//!
//! Outbound, a payload is serialized, its double quotes replaced by
//! [`QUOTE_MARKER`], and the text cut into fixed-size pieces. Each piece
//! travels as the payload of an ordinary message sharing one session id.
//!
//! Inbound, [`SplitReassembler`] collects the pieces of a session and, once
//! the final index arrives, rebuilds the original message. Incomplete or
//! orphaned sessions are logged and dropped, never surfaced as errors.

use std::collections::BTreeMap;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use tether_core::config::MessagingConfig;
use tether_core::{ChunkEnvelope, Message, Payload, SessionId};

/// Stands in for `"` inside chunk text. serde_json never emits raw control
/// characters, so the marker cannot occur in a serialized payload.
pub const QUOTE_MARKER: &str = "\u{1}Q\u{1}";

/// Default age after which an unfinished reassembly is evicted.
pub const DEFAULT_REASSEMBLY_TTL: Duration = Duration::from_secs(30);

/// Default cap on the chunk count a first chunk may announce.
pub const DEFAULT_MAX_CHUNKS: u32 = 4096;

/// Cut `payload` into chunk envelopes of at most `chunk_size` characters.
///
/// Only the first envelope carries `last_index`, the index of the final chunk.
/// A `chunk_size` of zero is treated as one.
pub fn split_payload(
    payload: &Payload,
    chunk_size: usize,
) -> Result<Vec<ChunkEnvelope>, serde_json::Error> {
    let text = serde_json::to_string(payload)?.replace('"', QUOTE_MARKER);
    let chars: Vec<char> = text.chars().collect();
    let pieces: Vec<String> = chars
        .chunks(chunk_size.max(1))
        .map(|piece| piece.iter().collect())
        .collect();

    let last_index = pieces.len().saturating_sub(1) as u32;
    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(i, split_payload)| ChunkEnvelope {
            package_index: i as u32,
            split_payload,
            last_index: (i == 0).then_some(last_index),
        })
        .collect())
}

/// Pieces received so far, keyed by index. Only filled slots take memory.
struct Assembly {
    pieces: BTreeMap<u32, String>,
    last_index: u32,
    started_at: Instant,
}

/// Collects chunked messages per session and rebuilds them.
pub struct SplitReassembler {
    active: DashMap<SessionId, Assembly>,
    ttl: Duration,
    max_chunks: u32,
}

impl Default for SplitReassembler {
    fn default() -> Self {
        Self::new(DEFAULT_REASSEMBLY_TTL)
    }
}

impl SplitReassembler {
    pub fn new(ttl: Duration) -> Self {
        Self {
            active: DashMap::new(),
            ttl,
            max_chunks: DEFAULT_MAX_CHUNKS,
        }
    }

    pub fn from_config(messaging: &MessagingConfig) -> Self {
        Self::new(messaging.reassembly_ttl()).with_max_chunks(messaging.max_chunks)
    }

    /// Refuse split messages announcing more than `max_chunks` chunks.
    pub fn with_max_chunks(mut self, max_chunks: u32) -> Self {
        self.max_chunks = max_chunks.max(1);
        self
    }

    /// Feed one inbound message.
    ///
    /// Non-chunk messages come straight back. A chunk returns `None` until it
    /// completes its session, at which point the rebuilt message is returned
    /// with the metadata and responder of the final chunk.
    pub fn accept(&self, message: Message) -> Option<Message> {
        if !ChunkEnvelope::is_chunk(message.payload()) {
            return Some(message);
        }
        self.cleanup_stale();

        let session_id = message.session_id();
        let chunk = match ChunkEnvelope::from_payload(message.payload()) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "malformed chunk envelope, discarding");
                return None;
            }
        };
        let index = chunk.package_index;

        let complete = if index == 0 {
            let Some(last_index) = chunk.last_index else {
                tracing::warn!(%session_id, "first chunk carries no last_index, discarding");
                return None;
            };
            if last_index >= self.max_chunks {
                tracing::warn!(
                    %session_id,
                    last_index,
                    max_chunks = self.max_chunks,
                    "split message announces too many chunks, discarding"
                );
                return None;
            }
            let pieces = BTreeMap::from([(0, chunk.split_payload)]);
            if self
                .active
                .insert(
                    session_id,
                    Assembly {
                        pieces,
                        last_index,
                        started_at: Instant::now(),
                    },
                )
                .is_some()
            {
                tracing::debug!(%session_id, "restarted reassembly on repeated first chunk");
            }
            last_index == 0
        } else {
            let Some(mut assembly) = self.active.get_mut(&session_id) else {
                tracing::warn!(%session_id, index, "orphaned chunk without a first chunk, discarding");
                return None;
            };
            if index > assembly.last_index {
                tracing::warn!(%session_id, index, "chunk index beyond last_index, discarding");
                return None;
            }
            assembly.pieces.insert(index, chunk.split_payload);
            index == assembly.last_index
        };

        if !complete {
            tracing::trace!(%session_id, index, "chunk stored");
            return None;
        }

        let (_, assembly) = self.active.remove(&session_id)?;
        let received = assembly.pieces.len();
        if received != assembly.last_index as usize + 1 {
            let missing = (0..=assembly.last_index)
                .find(|i| !assembly.pieces.contains_key(i))
                .unwrap_or_default();
            tracing::warn!(%session_id, missing, received, "chunk lost, discarding split message");
            return None;
        }
        let text: String = assembly.pieces.into_values().collect();

        let text = text.replace(QUOTE_MARKER, "\"");
        match serde_json::from_str::<Payload>(&text) {
            Ok(payload) => {
                tracing::debug!(%session_id, path = message.path(), "split message reassembled");
                Some(message.with_payload(payload))
            }
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "reassembled payload is not a JSON object, discarding");
                None
            }
        }
    }

    /// Number of sessions still waiting for chunks.
    pub fn pending(&self) -> usize {
        self.active.len()
    }

    /// Evict reassemblies older than the TTL.
    pub fn cleanup_stale(&self) {
        let ttl = self.ttl;
        self.active.retain(|session_id, assembly| {
            let stale = assembly.started_at.elapsed() > ttl;
            if stale {
                tracing::warn!(%session_id, "removing stale reassembly (timed out)");
            }
            !stale
        });
    }
}
