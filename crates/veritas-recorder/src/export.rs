//! Portable snapshot of a session for offline verification.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use veritas_core::{Digest, LogEntry, SessionId, SessionStatus};

use crate::session::Session;

/// Everything a third party needs to re-check a session without access to
/// the recorder: the ordered entries, the leaf hashes the recorder claims
/// for them, and the sealed root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionExport {
    pub session_id: SessionId,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub session_root: Option<Digest>,
    pub attestation_ref: Option<String>,
    pub entries: Vec<LogEntry>,
    pub leaf_hashes: Vec<Digest>,
}

impl SessionExport {
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Read an export previously written with [`SessionExport::to_json_pretty`].
    pub fn read_from(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(std::io::Error::other)
    }
}

impl From<&Session> for SessionExport {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id(),
            agent_id: session.agent_id().to_string(),
            started_at: session.started_at(),
            status: session.status(),
            session_root: session.session_root(),
            attestation_ref: session.attestation_ref().map(str::to_string),
            entries: session.entries().to_vec(),
            leaf_hashes: session.chain().leaf_hashes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidencePolicy;
    use veritas_core::EntryDraft;

    #[test]
    fn export_carries_root_and_leaves() {
        let mut session = Session::new("exporter", EvidencePolicy::default());
        session
            .append(EntryDraft::observation("price", serde_json::json!({"pair": "ETH/USD"}), 2500.5))
            .unwrap();
        let root = session.seal().unwrap();

        let export = SessionExport::from(&session);
        assert_eq!(export.session_root, Some(root));
        assert_eq!(export.leaf_hashes, vec![session.entries()[0].entry_hash]);

        let json = export.to_json_pretty().unwrap();
        assert!(json.contains("\"status\": \"SEALED\""));
        assert_eq!(SessionExport::from_json(&json).unwrap(), export);
    }

    #[test]
    fn read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");

        let mut session = Session::new("exporter", EvidencePolicy::default());
        session.append(EntryDraft::thought("plan")).unwrap();
        let export = SessionExport::from(&session);
        std::fs::write(&path, export.to_json_pretty().unwrap()).unwrap();

        assert_eq!(SessionExport::read_from(&path).unwrap(), export);
        std::fs::write(&path, "not json").unwrap();
        assert!(SessionExport::read_from(&path).is_err());
    }
}
