//! BLAKE3 hashing for tamper evidence.
//!
//! Entry hashes chain each entry to its predecessor:
//! `entry_hash = H(prev_entry_hash ‖ H(canonical(entry)))`.
//! Merkle nodes hash the raw concatenation of their children.

use veritas_core::{Digest, EncodingError};

use crate::canonical::{self, EntryFields};

/// Predecessor hash of the first entry in every session.
pub const GENESIS_HASH: Digest = Digest::ZERO;

/// BLAKE3 of arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> Digest {
    Digest(*blake3::hash(data).as_bytes())
}

/// `H(left ‖ right)` over the raw 32-byte digests.
pub fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Digest(*hasher.finalize().as_bytes())
}

/// Hash of an entry's canonical encoding, before chaining.
pub fn content_hash(fields: &EntryFields<'_>) -> Result<Digest, EncodingError> {
    let bytes = canonical::encode_entry(fields)?;
    Ok(hash_bytes(&bytes))
}

/// Compute an entry's chained hash from its predecessor.
pub fn compute_entry_hash(prev: &Digest, fields: &EntryFields<'_>) -> Result<Digest, EncodingError> {
    Ok(hash_pair(prev, &content_hash(fields)?))
}
