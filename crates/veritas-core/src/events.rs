//! Events published to live viewers.
//!
//! The recorder pushes immutable copies of finished entries and lifecycle
//! changes onto a broadcast channel. Subscribers can only observe; nothing
//! they receive feeds back into the authoritative log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Digest, LogEntry, SessionId};

/// An event emitted by the recorder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecorderEvent {
    pub session_id: SessionId,
    pub emitted_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl RecorderEvent {
    pub fn new(session_id: SessionId, payload: EventPayload) -> Self {
        Self {
            session_id,
            emitted_at: Utc::now(),
            payload,
        }
    }
}

/// The event payload, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum EventPayload {
    /// A new session was opened.
    SessionOpened { agent_id: String },
    /// An entry was appended to the session log.
    EntryAppended { entry: LogEntry },
    /// The session was sealed into a Merkle root.
    SessionSealed { session_root: Digest, entry_count: u64 },
    /// The session root was committed by the attestation service.
    SessionAttested {
        session_root: Digest,
        attestation_ref: String,
    },
    /// Corruption was detected; the session no longer accepts writes.
    IntegrityViolation { detail: String },
}
