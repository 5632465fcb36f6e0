//! Boundary to the external attestation service.
//!
//! The recorder hands a sealed root to an [`Attestor`] and records the
//! transaction reference it gets back. How the root reaches a chain (or
//! any other public log) is the attestor's business.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use veritas_core::{Digest, SessionId};

/// What gets committed for a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttestationRequest {
    pub session_id: SessionId,
    pub agent_id: String,
    pub session_root: Digest,
    pub timestamp: DateTime<Utc>,
}

/// Confirmation from the attestation service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttestationReceipt {
    /// Transaction identifier (or equivalent) of the commitment.
    pub tx_ref: String,
}

/// Why an attestation did not go through. Always retryable from the
/// recorder's point of view.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttestationError {
    #[error("Attestation service unreachable: {0}")]
    Unreachable(String),

    #[error("Attestation rejected: {0}")]
    Rejected(String),
}

/// Submits session roots to an attestation service.
pub trait Attestor: Send + Sync {
    fn attest(
        &self,
        request: AttestationRequest,
    ) -> impl Future<Output = Result<AttestationReceipt, AttestationError>> + Send;
}
