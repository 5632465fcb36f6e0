//! Evidence-chaining policy.
//!
//! An agent's consequential actions must be traceable to observations that
//! were already on the record when the action was taken. Validation runs
//! before an entry is hashed, so a rejected draft never touches the log.

use veritas_core::{EntryDraft, EventType, LogEntry};

use crate::error::{DanglingReason, IntegrityError};

/// Validation knobs. The default follows the base policy: actions may cite
/// an observation but are not forced to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvidencePolicy {
    /// Reject ACTION entries without a basis.
    pub require_action_basis: bool,
}

/// Check a draft against the entries already in the log.
///
/// `current` must be the complete, ordered entry list; the draft will be
/// assigned `current.len()` as its sequence id.
pub fn validate(
    draft: &EntryDraft,
    current: &[LogEntry],
    policy: EvidencePolicy,
) -> Result<(), IntegrityError> {
    let sequence_id = current.len() as u64;

    match (draft.event_type, draft.basis_id) {
        (EventType::Action, Some(basis_id)) => {
            let basis = usize::try_from(basis_id)
                .ok()
                .and_then(|i| current.get(i))
                .ok_or(IntegrityError::DanglingBasis {
                    sequence_id,
                    basis_id,
                    reason: DanglingReason::Future,
                })?;
            if basis.event_type != EventType::Observation {
                return Err(IntegrityError::DanglingBasis {
                    sequence_id,
                    basis_id,
                    reason: DanglingReason::NotObservation(basis.event_type),
                });
            }
        }
        (EventType::Action, None) => {
            if policy.require_action_basis {
                return Err(IntegrityError::MissingBasis { sequence_id });
            }
        }
        (event_type, Some(_)) => {
            return Err(IntegrityError::ForbiddenBasis {
                sequence_id,
                event_type,
            });
        }
        (_, None) => {}
    }

    if let Some(last) = current.last() {
        if draft.timestamp < last.timestamp {
            return Err(IntegrityError::NonMonotonicTimestamp { sequence_id });
        }
    }

    Ok(())
}
