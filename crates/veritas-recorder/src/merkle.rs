//! Merkle tree over a session's entry hashes.
//!
//! Leaves are entry hashes in sequence order and internal nodes are
//! `H(left ‖ right)`. When a level has an odd number of nodes the last node
//! is duplicated before pairing, so the same leaf set always yields the
//! same root. The tree is a disposable view: it can be rebuilt from the
//! log at any time and is never the authority for entry content.

use veritas_core::Digest;

use crate::hash::hash_pair;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
    #[error("Cannot build a Merkle tree from zero leaves")]
    Empty,
}

/// A fully materialized Merkle tree, kept level by level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    /// `levels[0]` holds the leaves; the last level holds only the root.
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    /// Build the tree bottom-up.
    pub fn build(leaves: Vec<Digest>) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::Empty);
        }

        let mut levels = Vec::new();
        let mut current = leaves;
        while current.len() > 1 {
            let next = next_level(&current);
            levels.push(current);
            current = next;
        }
        levels.push(current);

        tracing::debug!(
            leaves = levels[0].len(),
            height = levels.len(),
            "Merkle tree built"
        );
        Ok(Self { levels })
    }

    pub fn root(&self) -> Digest {
        // `build` guarantees a non-empty final level.
        self.levels
            .last()
            .and_then(|l| l.first())
            .copied()
            .unwrap_or_default()
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    pub fn levels(&self) -> &[Vec<Digest>] {
        &self.levels
    }

    pub fn leaf(&self, index: usize) -> Option<Digest> {
        self.levels[0].get(index).copied()
    }
}

/// Hash one level into the next, duplicating a trailing odd node.
fn next_level(level: &[Digest]) -> Vec<Digest> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hash_pair(left, right),
            [last] => hash_pair(last, last),
            _ => unreachable!("chunks(2) yields one or two nodes"),
        })
        .collect()
}

/// Root of the tree over `leaves`.
pub fn compute_root(leaves: &[Digest]) -> Result<Digest, MerkleError> {
    MerkleTree::build(leaves.to_vec()).map(|t| t.root())
}
