//! Offline verification of an exported session.
//!
//! The verifier trusts nothing in the export except the entry fields
//! themselves. It recomputes every entry hash, the Merkle root, and the
//! evidence links, and reports each check as a [`Finding`].

use std::fmt;

use serde::{Deserialize, Serialize};

use veritas_core::{Digest, EntryDraft, EventType, LogEntry, SessionStatus};

use crate::canonical::EntryFields;
use crate::evidence::{self, EvidencePolicy};
use crate::export::SessionExport;
use crate::hash::{compute_entry_hash, GENESIS_HASH};
use crate::merkle::compute_root;

/// Severity of a single finding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Pass,
    Info,
    Warn,
    Fail,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pass => "PASS",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Fail => "FAIL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub level: Level,
    pub text: String,
}

impl Finding {
    fn new(level: Level, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

/// Outcome of [`verify_export`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationReport {
    pub is_valid: bool,
    pub message: String,
    pub details: Vec<Finding>,
}

impl VerificationReport {
    fn from_findings(details: Vec<Finding>) -> Self {
        let is_valid = !details.iter().any(|f| f.level == Level::Fail);
        let message = if is_valid {
            "Session integrity verified"
        } else {
            "Session integrity verification FAILED"
        };
        Self {
            is_valid,
            message: message.to_string(),
            details,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &Finding> {
        self.details.iter().filter(|f| f.level == Level::Fail)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.details.iter().filter(|f| f.level == Level::Warn)
    }
}

/// Re-check an exported session end to end.
pub fn verify_export(export: &SessionExport) -> VerificationReport {
    let mut details = Vec::new();

    if export.entries.is_empty() {
        details.push(Finding::new(Level::Fail, "No entries found in export"));
        return VerificationReport::from_findings(details);
    }

    let recomputed = check_rows(export, &mut details);
    check_root(export, &recomputed, &mut details);
    check_links(&export.entries, &mut details);

    let report = VerificationReport::from_findings(details);
    if report.is_valid {
        tracing::info!(
            session_id = %export.session_id,
            entries = export.entries.len(),
            "Export verification successful"
        );
    } else {
        tracing::warn!(
            session_id = %export.session_id,
            failures = report.failures().count(),
            "Export verification failed"
        );
    }
    report
}

/// Per-row hash check. Each row is hashed against the stored hash of its
/// predecessor so a single edited row is reported on its own. Returns the
/// recomputed hashes.
fn check_rows(export: &SessionExport, details: &mut Vec<Finding>) -> Vec<Digest> {
    let claimed = &export.leaf_hashes;
    if claimed.is_empty() {
        details.push(Finding::new(
            Level::Info,
            "No leaf hashes in export; checking stored entry hashes only",
        ));
    } else if claimed.len() != export.entries.len() {
        details.push(Finding::new(
            Level::Fail,
            format!(
                "Export lists {} leaf hashes for {} entries",
                claimed.len(),
                export.entries.len()
            ),
        ));
    }

    let mut recomputed = Vec::with_capacity(export.entries.len());
    let mut prev = GENESIS_HASH;

    for (i, entry) in export.entries.iter().enumerate() {
        if entry.sequence_id != i as u64 {
            details.push(Finding::new(
                Level::Fail,
                format!(
                    "Entry at position {i} carries sequence id {}",
                    entry.sequence_id
                ),
            ));
        }

        let calculated = match compute_entry_hash(&prev, &EntryFields::from(entry)) {
            Ok(h) => h,
            Err(e) => {
                details.push(Finding::new(
                    Level::Fail,
                    format!("Entry #{i} ({}) cannot be encoded: {e}", entry.tool_name),
                ));
                prev = entry.entry_hash;
                recomputed.push(entry.entry_hash);
                continue;
            }
        };

        let expected = claimed.get(i).copied().unwrap_or(entry.entry_hash);
        if calculated != entry.entry_hash || calculated != expected {
            details.push(Finding::new(
                Level::Fail,
                format!(
                    "TAMPER DETECTED in entry #{i} ({}): expected {}..., found {}...",
                    entry.tool_name,
                    expected.short(),
                    calculated.short()
                ),
            ));
        } else {
            details.push(Finding::new(
                Level::Pass,
                format!("Verified entry #{i}: {}", entry.tool_name),
            ));
        }

        recomputed.push(calculated);
        prev = entry.entry_hash;
    }

    recomputed
}

fn check_root(export: &SessionExport, leaves: &[Digest], details: &mut Vec<Finding>) {
    let Ok(calculated) = compute_root(leaves) else {
        return;
    };

    // A root is present exactly when the session has left OPEN.
    match (export.status, export.session_root) {
        (SessionStatus::Open, None) => details.push(Finding::new(
            Level::Warn,
            format!("Session is OPEN with no sealed root; computed root would be {calculated}"),
        )),
        (SessionStatus::Open, Some(_)) => details.push(Finding::new(
            Level::Fail,
            "Session is OPEN but claims a sealed root",
        )),
        (status, None) => details.push(Finding::new(
            Level::Fail,
            format!("Session is {status} but carries no sealed root"),
        )),
        (_, Some(claimed)) if claimed == calculated => details.push(Finding::new(
            Level::Pass,
            format!("Merkle root verified: {calculated}"),
        )),
        (_, Some(claimed)) => details.push(Finding::new(
            Level::Fail,
            format!(
                "Merkle root mismatch: calculated {}..., claimed {}...",
                calculated.short(),
                claimed.short()
            ),
        )),
    }
}

/// Evidence links and timestamp order, judged exactly as the recorder
/// judged them at append time.
fn check_links(entries: &[LogEntry], details: &mut Vec<Finding>) {
    for (i, entry) in entries.iter().enumerate() {
        let draft = EntryDraft {
            event_type: entry.event_type,
            tool_name: entry.tool_name.clone(),
            input_params: entry.input_params.clone(),
            output_result: entry.output_result.clone(),
            timestamp: entry.timestamp,
            basis_id: entry.basis_id,
        };

        if let Err(e) = evidence::validate(&draft, &entries[..i], EvidencePolicy::default()) {
            details.push(Finding::new(Level::Fail, format!("Broken link: {e}")));
            continue;
        }

        match (entry.event_type, entry.basis_id) {
            (EventType::Action, Some(basis_id)) => details.push(Finding::new(
                Level::Pass,
                format!("Verified link: {} -> #{basis_id}", entry.tool_name),
            )),
            (EventType::Action, None) => details.push(Finding::new(
                Level::Warn,
                format!("Action {} has no linked observation", entry.tool_name),
            )),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use veritas_core::Payload;

    fn sealed_export() -> SessionExport {
        let mut session = Session::new("auditor", EvidencePolicy::default());
        session
            .append(EntryDraft::observation(
                "balance_check",
                serde_json::json!({"address": "0xabc"}),
                "1.5 ETH",
            ))
            .unwrap();
        session
            .append(
                EntryDraft::action("transfer", serde_json::json!({"amount": "0.1"}), "tx sent")
                    .with_basis(0),
            )
            .unwrap();
        session
            .append(EntryDraft::action("post", serde_json::json!({}), "ok"))
            .unwrap();
        session.seal().unwrap();
        SessionExport::from(&session)
    }

    #[test]
    fn untouched_export_verifies() {
        let report = verify_export(&sealed_export());
        assert!(report.is_valid, "{report:?}");
        assert_eq!(report.message, "Session integrity verified");
        assert!(report
            .details
            .iter()
            .any(|f| f.text.starts_with("Merkle root verified")));
        // The unbased "post" action is flagged but not fatal.
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn edited_row_is_pinpointed() {
        let mut export = sealed_export();
        export.entries[0].output_result = Payload::from("150 ETH");

        let report = verify_export(&export);
        assert!(!report.is_valid);
        let failures: Vec<_> = report.failures().collect();
        assert!(failures[0].text.contains("TAMPER DETECTED in entry #0"));
        assert!(failures
            .iter()
            .any(|f| f.text.starts_with("Merkle root mismatch")));
        // Later rows still chain to the stored hash of row 0.
        assert!(report
            .details
            .iter()
            .any(|f| f.level == Level::Pass && f.text == "Verified entry #1: transfer"));
    }

    #[test]
    fn forged_root_fails() {
        let mut export = sealed_export();
        export.session_root = Some(Digest([1; 32]));
        let report = verify_export(&export);
        assert!(!report.is_valid);
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn rewired_basis_is_a_broken_link() {
        let mut export = sealed_export();
        export.entries[1].basis_id = Some(5);
        let report = verify_export(&export);
        assert!(!report.is_valid);
        assert!(report
            .failures()
            .any(|f| f.text.starts_with("Broken link")));
    }

    #[test]
    fn unsealed_export_warns_about_missing_root() {
        let mut export = sealed_export();
        export.session_root = None;
        export.status = SessionStatus::Open;
        let report = verify_export(&export);
        assert!(report.is_valid);
        assert!(report.warnings().any(|f| f.text.contains("no sealed root")));
    }

    #[test]
    fn sealed_export_without_root_fails() {
        for status in [SessionStatus::Sealed, SessionStatus::Attested] {
            let mut export = sealed_export();
            export.status = status;
            export.session_root = None;
            let report = verify_export(&export);
            assert!(!report.is_valid, "{status} export without a root passed");
            assert!(report
                .failures()
                .any(|f| f.text.contains("carries no sealed root")));
        }
    }

    #[test]
    fn open_export_with_root_fails() {
        let mut export = sealed_export();
        export.status = SessionStatus::Open;
        let report = verify_export(&export);
        assert!(!report.is_valid);
        assert!(report
            .failures()
            .any(|f| f.text == "Session is OPEN but claims a sealed root"));
    }

    #[test]
    fn float_payloads_survive_json_export() {
        let mut session = Session::new("quoter", EvidencePolicy::default());
        for price in crate::test_support::awkward_floats() {
            session
                .append(EntryDraft::observation("price", serde_json::json!({}), price))
                .unwrap();
        }
        session.seal().unwrap();

        let json = SessionExport::from(&session).to_json_pretty().unwrap();
        let back = SessionExport::from_json(&json).unwrap();
        let report = verify_export(&back);
        assert!(report.is_valid, "{:?}", report.failures().collect::<Vec<_>>());
    }

    #[test]
    fn empty_export_is_invalid() {
        let mut export = sealed_export();
        export.entries.clear();
        export.leaf_hashes.clear();
        let report = verify_export(&export);
        assert!(!report.is_valid);
        assert_eq!(report.details[0].text, "No entries found in export");
    }
}
