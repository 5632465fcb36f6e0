//! Session manager: the recorder's public entry point.
//!
//! Routes calls to the right session through the injected
//! [`SessionStore`], writes every state change through to it, and
//! publishes [`RecorderEvent`]s for live viewers.

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

use veritas_core::{
    Digest, EntryDraft, EventPayload, EventType, LogEntry, Payload, RecorderConfig,
    RecorderEvent, SessionId, SessionStatus, SYSTEM_TOOL,
};

use crate::attest::{AttestationReceipt, Attestor};
use crate::error::{RecorderError, Result};
use crate::evidence::EvidencePolicy;
use crate::export::SessionExport;
use crate::proof::InclusionProof;
use crate::session::Session;
use crate::store::{
    lock_session, SessionHandle, SessionQuery, SessionStore, SessionSummary, StoreError,
};

impl From<&RecorderConfig> for EvidencePolicy {
    fn from(config: &RecorderConfig) -> Self {
        Self {
            require_action_basis: config.require_action_basis,
        }
    }
}

/// Owns the session store and the live-view channel.
pub struct SessionManager<S: SessionStore> {
    store: S,
    policy: EvidencePolicy,
    events: broadcast::Sender<RecorderEvent>,
}

impl<S: SessionStore> SessionManager<S> {
    pub fn new(store: S, config: &RecorderConfig) -> Self {
        let (events, _) = broadcast::channel(config.stream_capacity.max(1));
        Self {
            store,
            policy: EvidencePolicy::from(config),
            events,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Live view of everything the recorder does. Receivers that fall
    /// behind lose old events; the log itself is unaffected.
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.events.subscribe()
    }

    /// Start a new, empty session.
    pub fn open_session(&self, agent_id: &str) -> Result<SessionId> {
        let session = Session::new(agent_id, self.policy);
        let id = session.id();
        self.store.insert(session)?;

        tracing::info!(session_id = %id, agent_id, "Session opened");
        self.publish(
            id,
            EventPayload::SessionOpened {
                agent_id: agent_id.to_string(),
            },
        );
        Ok(id)
    }

    /// Append a draft to an open session.
    pub fn append(&self, session_id: SessionId, draft: EntryDraft) -> Result<LogEntry> {
        let entry = self.mutate(session_id, |s| s.append(draft))?;

        tracing::debug!(
            session_id = %session_id,
            sequence_id = entry.sequence_id,
            event_type = %entry.event_type,
            tool = %entry.tool_name,
            hash = %entry.entry_hash.short(),
            "Entry recorded"
        );
        self.publish(
            session_id,
            EventPayload::EntryAppended {
                entry: entry.clone(),
            },
        );
        Ok(entry)
    }

    /// Append an entry stamped with the current time.
    pub fn record(
        &self,
        session_id: SessionId,
        event_type: EventType,
        tool_name: &str,
        input_params: impl Into<Payload>,
        output_result: impl Into<Payload>,
        basis_id: Option<u64>,
    ) -> Result<LogEntry> {
        let mut draft = EntryDraft::new(event_type, tool_name, input_params, output_result);
        draft.basis_id = basis_id;
        self.append(session_id, draft)
    }

    /// Run a tool call and record its outcome.
    ///
    /// A successful result is recorded as `event_type` under `tool_name`.
    /// A failure is recorded as an ERROR entry under [`SYSTEM_TOOL`], with
    /// the failing tool and its inputs as the entry's inputs. The call's own
    /// result is handed back either way; the outer `Result` only reports
    /// recorder failures.
    pub fn record_call<T, E, F>(
        &self,
        session_id: SessionId,
        event_type: EventType,
        tool_name: &str,
        input_params: impl Into<Payload>,
        basis_id: Option<u64>,
        call: F,
    ) -> Result<std::result::Result<T, E>>
    where
        T: Serialize,
        E: std::fmt::Display,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let input_params = input_params.into();
        let outcome = call();

        match &outcome {
            Ok(value) => {
                let output = serde_json::to_value(value)
                    .map(Payload::from)
                    .unwrap_or_else(|_| Payload::from("unserializable_result"));
                self.record(session_id, event_type, tool_name, input_params, output, basis_id)?;
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, tool = tool_name, error = %e, "Tool call failed");
                let inputs = Payload::map([
                    ("tool", Payload::from(tool_name)),
                    ("input_params", input_params),
                ]);
                self.append(
                    session_id,
                    EntryDraft::error(SYSTEM_TOOL, inputs, &e.to_string()),
                )?;
            }
        }

        Ok(outcome)
    }

    /// Seal a session and return its Merkle root.
    pub fn seal(&self, session_id: SessionId) -> Result<Digest> {
        let (root, entry_count, newly_sealed) = self.mutate(session_id, |s| {
            let was_open = s.status() == SessionStatus::Open;
            let root = s.seal()?;
            Ok((root, s.entries().len() as u64, was_open))
        })?;

        if newly_sealed {
            self.publish(
                session_id,
                EventPayload::SessionSealed {
                    session_root: root,
                    entry_count,
                },
            );
        }
        Ok(root)
    }

    /// Inclusion proof for one entry of a sealed session.
    pub fn prove(&self, session_id: SessionId, sequence_id: u64) -> Result<InclusionProof> {
        self.mutate(session_id, |s| s.prove(sequence_id))
    }

    /// Submit a sealed session's root to the attestation service.
    ///
    /// The session lock is released while the attestor runs. On failure the
    /// session stays SEALED and the call can be retried with the same root.
    /// An already attested session returns its recorded receipt.
    pub async fn attest<A: Attestor>(
        &self,
        session_id: SessionId,
        attestor: &A,
    ) -> Result<AttestationReceipt> {
        let handle = self.handle(session_id)?;

        let request = {
            let session = lock_session(&handle);
            if let Some(receipt) = recorded_receipt(&session) {
                return Ok(receipt);
            }
            session.attestation_request(Utc::now())?
        };
        let submitted_root = request.session_root;

        tracing::info!(session_id = %session_id, root = %submitted_root, "Submitting session root");
        let receipt = attestor.attest(request).await.map_err(|e| {
            tracing::warn!(session_id = %session_id, error = %e, "Attestation failed, session stays SEALED");
            RecorderError::from(e)
        })?;

        let receipt = self.mutate(session_id, |s| {
            // Another caller may have finished first.
            if let Some(existing) = recorded_receipt(s) {
                return Ok(existing);
            }
            s.record_attestation(submitted_root, &receipt)?;
            Ok(receipt)
        })?;

        self.publish(
            session_id,
            EventPayload::SessionAttested {
                session_root: submitted_root,
                attestation_ref: receipt.tx_ref.clone(),
            },
        );
        Ok(receipt)
    }

    /// Ordered copy of a session's entries.
    pub fn entries(&self, session_id: SessionId) -> Result<Vec<LogEntry>> {
        self.read(session_id, |s| s.entries().to_vec())
    }

    pub fn snapshot(&self, session_id: SessionId) -> Result<Session> {
        self.read(session_id, Session::clone)
    }

    /// Sequence id of the latest observation, the usual basis for the next
    /// action.
    pub fn last_observation(&self, session_id: SessionId) -> Result<Option<u64>> {
        self.read(session_id, Session::last_observation)
    }

    /// Recompute the hash chain. A break poisons the session.
    pub fn verify_chain(&self, session_id: SessionId) -> Result<bool> {
        self.mutate(session_id, |s| Ok(s.verify_chain()))
    }

    pub fn export(&self, session_id: SessionId) -> Result<SessionExport> {
        self.read(session_id, |s| SessionExport::from(s))
    }

    pub fn list_sessions(&self, query: &SessionQuery) -> Result<Vec<SessionSummary>> {
        Ok(self.store.list(query)?)
    }

    // ── Internals ────────────────────────────────────────────────

    fn handle(&self, session_id: SessionId) -> Result<SessionHandle> {
        self.store.get(session_id).map_err(|e| match e {
            StoreError::NotFound(id) => RecorderError::SessionNotFound(id),
            other => other.into(),
        })
    }

    fn read<T>(&self, session_id: SessionId, op: impl FnOnce(&Session) -> T) -> Result<T> {
        let handle = self.handle(session_id)?;
        let session = lock_session(&handle);
        Ok(op(&session))
    }

    /// Run `op` under the session lock and write any change through to the
    /// store. `op` works on a copy that replaces the live session only once
    /// the store has accepted it, so a failed write leaves no trace. Newly
    /// detected corruption is kept and published even when `op` or the
    /// write fails.
    fn mutate<T>(
        &self,
        session_id: SessionId,
        op: impl FnOnce(&mut Session) -> Result<T>,
    ) -> Result<T> {
        let handle = self.handle(session_id)?;
        let mut session = lock_session(&handle);

        let before = session.record();
        let mut working = session.clone();
        let result = op(&mut working);
        let newly_corrupted = match (&before.corruption, working.corruption()) {
            (None, Some(detail)) => Some(detail.to_string()),
            _ => None,
        };

        let written = if working.record() != before {
            self.store.persist(&working)
        } else {
            Ok(())
        };

        match written {
            Ok(()) => *session = working,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Write-through failed, change discarded");
                if newly_corrupted.is_some() {
                    *session = working;
                }
                drop(session);
                if let Some(detail) = newly_corrupted {
                    self.publish(session_id, EventPayload::IntegrityViolation { detail });
                }
                return Err(e.into());
            }
        }
        drop(session);

        if let Some(detail) = newly_corrupted {
            self.publish(session_id, EventPayload::IntegrityViolation { detail });
        }
        result
    }

    fn publish(&self, session_id: SessionId, payload: EventPayload) {
        // No subscribers is not an error.
        let _ = self.events.send(RecorderEvent::new(session_id, payload));
    }
}

fn recorded_receipt(session: &Session) -> Option<AttestationReceipt> {
    match (session.status(), session.attestation_ref()) {
        (SessionStatus::Attested, Some(tx_ref)) => Some(AttestationReceipt {
            tx_ref: tx_ref.to_string(),
        }),
        _ => None,
    }
}
