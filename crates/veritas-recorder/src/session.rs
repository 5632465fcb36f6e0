//! One agent session and its lifecycle.
//!
//! A session moves `OPEN → SEALED → ATTESTED` and never back. Only an open
//! session accepts entries. Sealing fixes the Merkle root; attestation
//! records where that root was committed. Any detected corruption poisons
//! the session: it refuses every further write, seal, proof, and
//! attestation.
//!
//! ```
//! # use veritas_recorder::session::Session;
//! # use veritas_recorder::evidence::EvidencePolicy;
//! # use veritas_core::EntryDraft;
//! let mut session = Session::new("wallet-agent", EvidencePolicy::default());
//! let obs = session
//!     .append(EntryDraft::observation("balance_check", serde_json::json!({}), "1.5 ETH"))
//!     .unwrap();
//! session
//!     .append(EntryDraft::action("transfer", serde_json::json!({}), "tx sent").with_basis(obs.sequence_id))
//!     .unwrap();
//! let root = session.seal().unwrap();
//! let proof = session.prove(1).unwrap();
//! assert!(proof.verify(&session.entries()[1].entry_hash, &root));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use veritas_core::{Digest, EntryDraft, EventType, LogEntry, SessionId, SessionStatus};

use crate::attest::{AttestationReceipt, AttestationRequest};
use crate::chain::{ChainBreak, HashChain};
use crate::error::{RecorderError, Result};
use crate::evidence::EvidencePolicy;
use crate::merkle::MerkleTree;
use crate::proof::InclusionProof;

/// Persistable session metadata (everything except the entries).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub session_root: Option<Digest>,
    pub attestation_ref: Option<String>,
    pub corruption: Option<String>,
    pub entry_count: u64,
}

/// Why a persisted session could not be restored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RestoreError {
    #[error(transparent)]
    Chain(#[from] ChainBreak),

    #[error("Metadata lists {expected} entries but {found} were loaded")]
    EntryCount { expected: u64, found: u64 },

    #[error("Status {status} is inconsistent with the stored root")]
    RootPresence { status: SessionStatus },

    #[error("Stored root does not match the entries")]
    RootMismatch,

    #[error("Status {status} is inconsistent with the stored attestation reference")]
    AttestationPresence { status: SessionStatus },
}

/// An agent session: its hash-chained log plus lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    session_id: SessionId,
    agent_id: String,
    started_at: DateTime<Utc>,
    chain: HashChain,
    status: SessionStatus,
    session_root: Option<Digest>,
    attestation_ref: Option<String>,
    corruption: Option<String>,
    policy: EvidencePolicy,
}

impl Session {
    /// Open a new, empty session.
    pub fn new(agent_id: &str, policy: EvidencePolicy) -> Self {
        Self {
            session_id: SessionId::new(),
            agent_id: agent_id.to_string(),
            started_at: Utc::now(),
            chain: HashChain::new(),
            status: SessionStatus::Open,
            session_root: None,
            attestation_ref: None,
            corruption: None,
            policy,
        }
    }

    /// Rebuild a session from persisted metadata and entries, re-verifying
    /// the chain and, for sealed sessions, the root.
    pub fn restore(
        record: SessionRecord,
        entries: Vec<LogEntry>,
        policy: EvidencePolicy,
    ) -> std::result::Result<Self, RestoreError> {
        let found = entries.len() as u64;
        if found != record.entry_count {
            return Err(RestoreError::EntryCount {
                expected: record.entry_count,
                found,
            });
        }

        let chain = HashChain::from_entries(entries)?;

        // Only an attested session carries a reference.
        let attested = record.status == SessionStatus::Attested;
        if attested != record.attestation_ref.is_some() {
            return Err(RestoreError::AttestationPresence {
                status: record.status,
            });
        }

        match (record.status, record.session_root) {
            (SessionStatus::Open, None) => {}
            (SessionStatus::Open, Some(_)) | (_, None) => {
                return Err(RestoreError::RootPresence {
                    status: record.status,
                })
            }
            (_, Some(stored)) => {
                let rebuilt = MerkleTree::build(chain.leaf_hashes())
                    .map(|t| t.root())
                    .map_err(|_| RestoreError::RootMismatch)?;
                if rebuilt != stored {
                    return Err(RestoreError::RootMismatch);
                }
            }
        }

        Ok(Self {
            session_id: record.session_id,
            agent_id: record.agent_id,
            started_at: record.started_at,
            chain,
            status: record.status,
            session_root: record.session_root,
            attestation_ref: record.attestation_ref,
            corruption: record.corruption,
            policy,
        })
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn id(&self) -> SessionId {
        self.session_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn session_root(&self) -> Option<Digest> {
        self.session_root
    }

    pub fn attestation_ref(&self) -> Option<&str> {
        self.attestation_ref.as_deref()
    }

    /// Description of the detected corruption, if any.
    pub fn corruption(&self) -> Option<&str> {
        self.corruption.as_deref()
    }

    pub fn entries(&self) -> &[LogEntry] {
        self.chain.entries()
    }

    pub fn chain(&self) -> &HashChain {
        &self.chain
    }

    /// Sequence id of the most recent observation, the usual basis for the
    /// next action.
    pub fn last_observation(&self) -> Option<u64> {
        self.entries()
            .iter()
            .rev()
            .find(|e| e.event_type == EventType::Observation)
            .map(|e| e.sequence_id)
    }

    pub fn record(&self) -> SessionRecord {
        SessionRecord {
            session_id: self.session_id,
            agent_id: self.agent_id.clone(),
            started_at: self.started_at,
            status: self.status,
            session_root: self.session_root,
            attestation_ref: self.attestation_ref.clone(),
            corruption: self.corruption.clone(),
            entry_count: self.chain.len() as u64,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Append an entry. Only open, uncorrupted sessions accept entries.
    pub fn append(&mut self, draft: EntryDraft) -> Result<LogEntry> {
        self.ensure_intact()?;
        if self.status != SessionStatus::Open {
            return Err(RecorderError::SessionClosed {
                session_id: self.session_id,
                status: self.status,
            });
        }
        self.chain.append(draft, self.policy)
    }

    /// Seal the session and return its Merkle root.
    ///
    /// Sealing an already sealed session recomputes the root; an unchanged
    /// root is returned as-is, a changed one is treated as corruption.
    pub fn seal(&mut self) -> Result<Digest> {
        self.ensure_intact()?;

        if self.chain.is_empty() {
            return Err(RecorderError::EmptySession {
                session_id: self.session_id,
            });
        }
        if let Some(sequence_id) = self.chain.first_broken_link() {
            return Err(self.mark_corrupted(format!("hash chain broken at entry {sequence_id}")));
        }

        let root = self.rebuild_tree()?.root();

        match self.session_root {
            None => {
                self.session_root = Some(root);
                self.status = SessionStatus::Sealed;
                tracing::info!(
                    session_id = %self.session_id,
                    entries = self.chain.len(),
                    root = %root,
                    "Session sealed"
                );
                Ok(root)
            }
            Some(existing) if existing == root => Ok(existing),
            Some(existing) => Err(self.mark_corrupted(format!(
                "entries changed after seal: root {} became {}",
                existing.short(),
                root.short()
            ))),
        }
    }

    /// Inclusion proof for one entry of a sealed session.
    pub fn prove(&mut self, sequence_id: u64) -> Result<InclusionProof> {
        self.ensure_intact()?;
        let stored_root = self.session_root.ok_or(RecorderError::NotSealed {
            session_id: self.session_id,
        })?;

        let index = usize::try_from(sequence_id)
            .ok()
            .filter(|&i| i < self.chain.len())
            .ok_or(RecorderError::UnknownEntry {
                session_id: self.session_id,
                sequence_id,
            })?;

        let tree = self.rebuild_tree()?;
        if tree.root() != stored_root {
            return Err(self.mark_corrupted(format!(
                "rebuilt root {} does not match sealed root {}",
                tree.root().short(),
                stored_root.short()
            )));
        }

        InclusionProof::generate(&tree, index).ok_or(RecorderError::UnknownEntry {
            session_id: self.session_id,
            sequence_id,
        })
    }

    /// Recompute the hash chain; a failure poisons the session.
    pub fn verify_chain(&mut self) -> bool {
        match self.chain.first_broken_link() {
            Some(sequence_id) => {
                self.mark_corrupted(format!("hash chain broken at entry {sequence_id}"));
                false
            }
            None => true,
        }
    }

    /// Build the request to hand to the attestation service. Only sealed
    /// sessions can be attested.
    pub fn attestation_request(&self, timestamp: DateTime<Utc>) -> Result<AttestationRequest> {
        self.ensure_intact()?;
        match (self.status, self.session_root) {
            (SessionStatus::Sealed, Some(session_root)) => Ok(AttestationRequest {
                session_id: self.session_id,
                agent_id: self.agent_id.clone(),
                session_root,
                timestamp,
            }),
            (SessionStatus::Open, _) => Err(RecorderError::NotSealed {
                session_id: self.session_id,
            }),
            (status, _) => Err(RecorderError::SessionClosed {
                session_id: self.session_id,
                status,
            }),
        }
    }

    /// Record a confirmed attestation for the root that was submitted.
    pub fn record_attestation(
        &mut self,
        submitted_root: Digest,
        receipt: &AttestationReceipt,
    ) -> Result<()> {
        self.ensure_intact()?;
        if self.status != SessionStatus::Sealed {
            return Err(RecorderError::SessionClosed {
                session_id: self.session_id,
                status: self.status,
            });
        }
        if self.session_root != Some(submitted_root) {
            return Err(self.mark_corrupted(format!(
                "attested root {} is not the sealed root",
                submitted_root.short()
            )));
        }

        self.status = SessionStatus::Attested;
        self.attestation_ref = Some(receipt.tx_ref.clone());
        tracing::info!(
            session_id = %self.session_id,
            tx_ref = %receipt.tx_ref,
            "Session attested"
        );
        Ok(())
    }

    /// Flag the session as corrupted and return the matching error.
    pub(crate) fn mark_corrupted(&mut self, detail: String) -> RecorderError {
        tracing::error!(session_id = %self.session_id, detail = %detail, "Session integrity violation");
        if self.corruption.is_none() {
            self.corruption = Some(detail.clone());
        }
        RecorderError::InvariantViolation {
            session_id: self.session_id,
            detail,
        }
    }

    fn ensure_intact(&self) -> Result<()> {
        match &self.corruption {
            Some(detail) => Err(RecorderError::InvariantViolation {
                session_id: self.session_id,
                detail: detail.clone(),
            }),
            None => Ok(()),
        }
    }

    fn rebuild_tree(&self) -> Result<MerkleTree> {
        MerkleTree::build(self.chain.leaf_hashes()).map_err(|_| RecorderError::EmptySession {
            session_id: self.session_id,
        })
    }

    #[cfg(test)]
    pub(crate) fn entries_mut(&mut self) -> &mut Vec<LogEntry> {
        self.chain.entries_mut()
    }
}
