//! Error types for the veritas-recorder crate.

use thiserror::Error;

use veritas_core::{EncodingError, EventType, SessionId, SessionStatus};

use crate::attest::AttestationError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Session {session_id} is {status}, not OPEN")]
    SessionClosed {
        session_id: SessionId,
        status: SessionStatus,
    },

    #[error("Session {session_id} has not been sealed")]
    NotSealed { session_id: SessionId },

    #[error("Session {session_id} has no entries to seal")]
    EmptySession { session_id: SessionId },

    #[error("Invariant violation in session {session_id}: {detail}")]
    InvariantViolation { session_id: SessionId, detail: String },

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Entry {sequence_id} does not exist in session {session_id}")]
    UnknownEntry { session_id: SessionId, sequence_id: u64 },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Attestation failed: {0}")]
    Attestation(#[from] AttestationError),
}

/// An entry that would break the evidence-chaining policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("Entry {sequence_id} cites basis {basis_id}, which {reason}")]
    DanglingBasis {
        sequence_id: u64,
        basis_id: u64,
        reason: DanglingReason,
    },

    #[error("{event_type} entries may not carry a basis (entry {sequence_id})")]
    ForbiddenBasis {
        sequence_id: u64,
        event_type: EventType,
    },

    #[error("ACTION entry {sequence_id} cites no observation")]
    MissingBasis { sequence_id: u64 },

    #[error("Entry {sequence_id} is timestamped before its predecessor")]
    NonMonotonicTimestamp { sequence_id: u64 },
}

/// Why a cited basis is unacceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DanglingReason {
    /// The basis id is at or beyond the entry being appended.
    Future,
    /// The basis names an entry that is not an OBSERVATION.
    NotObservation(EventType),
}

impl std::fmt::Display for DanglingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Future => f.write_str("does not exist yet"),
            Self::NotObservation(t) => write!(f, "is a {t}, not an OBSERVATION"),
        }
    }
}

impl RecorderError {
    /// Whether the failed call may be retried without any change to the
    /// session. Only attestation failures qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Attestation(_))
    }
}

pub type Result<T> = std::result::Result<T, RecorderError>;
