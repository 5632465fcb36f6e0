//! Append-only, hash-chained entry log.
//!
//! Every entry's hash folds in the hash of the entry before it, so editing
//! any stored field breaks the chain from that entry forward.

use veritas_core::{Digest, EntryDraft, LogEntry};

use crate::canonical::EntryFields;
use crate::error::Result;
use crate::evidence::{self, EvidencePolicy};
use crate::hash::{self, GENESIS_HASH};

/// Position of the first entry whose stored hash does not match its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Hash chain broken at entry {sequence_id}")]
pub struct ChainBreak {
    pub sequence_id: u64,
}

/// Ordered, append-only list of hash-chained entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HashChain {
    entries: Vec<LogEntry>,
}

impl HashChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a chain from persisted entries, rejecting any break.
    pub fn from_entries(entries: Vec<LogEntry>) -> std::result::Result<Self, ChainBreak> {
        let chain = Self { entries };
        match chain.first_broken_link() {
            Some(sequence_id) => Err(ChainBreak { sequence_id }),
            None => Ok(chain),
        }
    }

    /// Validate, hash, and store a draft. On error the chain is unchanged.
    pub fn append(&mut self, draft: EntryDraft, policy: EvidencePolicy) -> Result<LogEntry> {
        evidence::validate(&draft, &self.entries, policy)?;

        let sequence_id = self.entries.len() as u64;
        let entry_hash =
            hash::compute_entry_hash(&self.head(), &EntryFields::from_draft(sequence_id, &draft))?;

        let entry = LogEntry {
            sequence_id,
            event_type: draft.event_type,
            tool_name: draft.tool_name,
            input_params: draft.input_params,
            output_result: draft.output_result,
            timestamp: draft.timestamp,
            basis_id: draft.basis_id,
            entry_hash,
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Recompute every hash from stored fields.
    pub fn verify_chain(&self) -> bool {
        match self.first_broken_link() {
            Some(sequence_id) => {
                tracing::warn!(sequence_id, "Hash chain verification failed");
                false
            }
            None => true,
        }
    }

    /// Sequence id of the first entry that fails verification, if any.
    pub fn first_broken_link(&self) -> Option<u64> {
        let mut prev = GENESIS_HASH;
        for (i, entry) in self.entries.iter().enumerate() {
            let position = i as u64;
            if entry.sequence_id != position {
                return Some(position);
            }
            match hash::compute_entry_hash(&prev, &EntryFields::from(entry)) {
                Ok(h) if h == entry.entry_hash => prev = entry.entry_hash,
                _ => return Some(position),
            }
        }
        None
    }

    /// Hash of the last entry, or the genesis seed for an empty chain.
    pub fn head(&self) -> Digest {
        self.entries
            .last()
            .map(|e| e.entry_hash)
            .unwrap_or(GENESIS_HASH)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn get(&self, sequence_id: u64) -> Option<&LogEntry> {
        usize::try_from(sequence_id)
            .ok()
            .and_then(|i| self.entries.get(i))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merkle leaves: entry hashes in sequence order.
    pub fn leaf_hashes(&self) -> Vec<Digest> {
        self.entries.iter().map(|e| e.entry_hash).collect()
    }

    #[cfg(test)]
    pub(crate) fn entries_mut(&mut self) -> &mut Vec<LogEntry> {
        &mut self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{IntegrityError, RecorderError};
    use veritas_core::{EncodingError, Payload};

    fn sample_chain(n: usize) -> HashChain {
        let mut chain = HashChain::new();
        chain
            .append(
                EntryDraft::observation("balance_check", serde_json::json!({}), "1.5 ETH"),
                EvidencePolicy::default(),
            )
            .unwrap();
        for i in 1..n {
            chain
                .append(
                    EntryDraft::action("transfer", serde_json::json!({ "i": i }), "tx sent")
                        .with_basis(0),
                    EvidencePolicy::default(),
                )
                .unwrap();
        }
        chain
    }

    #[test]
    fn sequence_ids_are_dense_and_chained() {
        let chain = sample_chain(4);
        assert_eq!(chain.len(), 4);
        let mut prev = GENESIS_HASH;
        for (i, entry) in chain.entries().iter().enumerate() {
            assert_eq!(entry.sequence_id, i as u64);
            let expected = hash::compute_entry_hash(&prev, &EntryFields::from(entry)).unwrap();
            assert_eq!(entry.entry_hash, expected);
            prev = entry.entry_hash;
        }
        assert_eq!(chain.head(), prev);
        assert!(chain.verify_chain());
    }

    #[test]
    fn empty_chain_head_is_genesis() {
        let chain = HashChain::new();
        assert_eq!(chain.head(), GENESIS_HASH);
        assert!(chain.verify_chain());
        assert!(chain.is_empty());
    }

    #[test]
    fn tampering_reports_first_broken_position() {
        let mut chain = sample_chain(5);
        chain.entries_mut()[2].output_result = Payload::from("tx failed");
        assert!(!chain.verify_chain());
        assert_eq!(chain.first_broken_link(), Some(2));
    }

    #[test]
    fn tampering_with_stored_hash_is_detected() {
        let mut chain = sample_chain(3);
        chain.entries_mut()[0].entry_hash = Digest([1; 32]);
        assert_eq!(chain.first_broken_link(), Some(0));
    }

    #[test]
    fn failed_append_leaves_chain_untouched() {
        let mut chain = sample_chain(2);
        let before = chain.clone();

        let err = chain
            .append(
                EntryDraft::action("transfer", serde_json::json!({}), "x").with_basis(1),
                EvidencePolicy::default(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RecorderError::Integrity(IntegrityError::DanglingBasis { .. })
        ));

        let err = chain
            .append(
                EntryDraft::observation("price", serde_json::json!({}), Payload::Float(f64::NAN)),
                EvidencePolicy::default(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RecorderError::Encoding(EncodingError::NonFiniteFloat { .. })
        ));

        assert_eq!(chain, before);
    }

    #[test]
    fn from_entries_rejects_broken_chain() {
        let chain = sample_chain(3);
        let rebuilt = HashChain::from_entries(chain.entries().to_vec()).unwrap();
        assert_eq!(rebuilt, chain);

        let mut entries = chain.entries().to_vec();
        entries.remove(1);
        assert_eq!(
            HashChain::from_entries(entries).unwrap_err(),
            ChainBreak { sequence_id: 1 }
        );
    }
}
