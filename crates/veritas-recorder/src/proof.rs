//! Inclusion proofs for individual entries.
//!
//! A proof is the sibling path from one leaf up to the root. Verification
//! is a pure fold over that path and needs nothing but the leaf hash, the
//! proof, and the expected root, so third parties can check an entry
//! offline without the rest of the session.

use serde::{Deserialize, Serialize};

use veritas_core::Digest;

use crate::hash::hash_pair;
use crate::merkle::MerkleTree;

/// Which side of the running hash a sibling sits on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// One level of an inclusion proof.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofStep {
    pub sibling: Digest,
    pub side: Side,
}

/// Sibling path proving that entry `sequence_id` is a leaf of a tree with
/// `leaf_count` leaves. Steps are ordered from the leaf to the root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InclusionProof {
    pub sequence_id: u64,
    pub leaf_count: u64,
    pub steps: Vec<ProofStep>,
}

impl InclusionProof {
    /// Generate the proof for leaf `index` of `tree`.
    pub fn generate(tree: &MerkleTree, index: usize) -> Option<Self> {
        if index >= tree.leaf_count() {
            return None;
        }

        let levels = tree.levels();
        let mut steps = Vec::with_capacity(levels.len().saturating_sub(1));
        let mut i = index;
        for level in &levels[..levels.len() - 1] {
            let step = if i % 2 == 1 {
                ProofStep {
                    sibling: level[i - 1],
                    side: Side::Left,
                }
            } else {
                // A trailing odd node is paired with itself.
                ProofStep {
                    sibling: *level.get(i + 1).unwrap_or(&level[i]),
                    side: Side::Right,
                }
            };
            steps.push(step);
            i /= 2;
        }

        Some(Self {
            sequence_id: index as u64,
            leaf_count: tree.leaf_count() as u64,
            steps,
        })
    }

    /// Check this proof for `leaf_hash` against `expected_root`.
    pub fn verify(&self, leaf_hash: &Digest, expected_root: &Digest) -> bool {
        verify(leaf_hash, self, expected_root)
    }

    /// Root obtained by folding the path over `leaf_hash`.
    pub fn fold(&self, leaf_hash: &Digest) -> Digest {
        self.steps.iter().fold(*leaf_hash, |acc, step| match step.side {
            Side::Left => hash_pair(&step.sibling, &acc),
            Side::Right => hash_pair(&acc, &step.sibling),
        })
    }
}

/// Number of proof steps for a tree with `leaf_count` leaves.
fn path_length(leaf_count: u64) -> usize {
    let mut n = leaf_count;
    let mut steps = 0;
    while n > 1 {
        n = n.div_ceil(2);
        steps += 1;
    }
    steps
}

/// Recompute the root from `leaf_hash` and `proof` and compare it with
/// `expected_root`.
///
/// The proof's shape must also agree with its claimed position: the path
/// length must match `leaf_count`, and each side flag must match the
/// parity of the leaf's index at that level.
pub fn verify(leaf_hash: &Digest, proof: &InclusionProof, expected_root: &Digest) -> bool {
    if proof.sequence_id >= proof.leaf_count {
        return false;
    }
    if proof.steps.len() != path_length(proof.leaf_count) {
        return false;
    }

    let mut index = proof.sequence_id;
    for step in &proof.steps {
        let expected_side = if index % 2 == 1 { Side::Left } else { Side::Right };
        if step.side != expected_side {
            return false;
        }
        index /= 2;
    }

    proof.fold(leaf_hash) == *expected_root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;

    fn leaves(n: usize) -> Vec<Digest> {
        (0..n).map(|i| hash_bytes(&(i as u64).to_be_bytes())).collect()
    }

    #[test]
    fn every_leaf_proves_for_many_sizes() {
        for n in 1..=17 {
            let l = leaves(n);
            let tree = MerkleTree::build(l.clone()).unwrap();
            let root = tree.root();
            for (i, leaf) in l.iter().enumerate() {
                let proof = InclusionProof::generate(&tree, i).unwrap();
                assert_eq!(proof.steps.len(), path_length(n as u64));
                assert!(verify(leaf, &proof, &root), "n={n} i={i}");
            }
        }
    }

    #[test]
    fn wrong_leaf_or_root_is_rejected() {
        let l = leaves(6);
        let tree = MerkleTree::build(l.clone()).unwrap();
        let proof = InclusionProof::generate(&tree, 4).unwrap();

        assert!(proof.verify(&l[4], &tree.root()));
        assert!(!proof.verify(&l[3], &tree.root()));
        assert!(!proof.verify(&l[4], &hash_bytes(b"not the root")));
    }

    #[test]
    fn tampered_path_is_rejected() {
        let l = leaves(8);
        let tree = MerkleTree::build(l.clone()).unwrap();
        let proof = InclusionProof::generate(&tree, 5).unwrap();

        let mut flipped = proof.clone();
        flipped.steps[0].side = Side::Right;
        assert!(!flipped.verify(&l[5], &tree.root()));

        let mut moved = proof.clone();
        moved.sequence_id = 4;
        assert!(!moved.verify(&l[5], &tree.root()));

        let mut truncated = proof.clone();
        truncated.steps.pop();
        assert!(!truncated.verify(&l[5], &tree.root()));

        let mut swapped_sibling = proof;
        swapped_sibling.steps[1].sibling = hash_bytes(b"x");
        assert!(!swapped_sibling.verify(&l[5], &tree.root()));
    }

    #[test]
    fn odd_tail_proof_uses_self_as_sibling() {
        let l = leaves(3);
        let tree = MerkleTree::build(l.clone()).unwrap();
        let proof = InclusionProof::generate(&tree, 2).unwrap();
        assert_eq!(
            proof.steps[0],
            ProofStep {
                sibling: l[2],
                side: Side::Right
            }
        );
        assert!(proof.verify(&l[2], &tree.root()));
    }

    #[test]
    fn out_of_range_index_has_no_proof() {
        let tree = MerkleTree::build(leaves(4)).unwrap();
        assert!(InclusionProof::generate(&tree, 4).is_none());
    }

    #[test]
    fn proof_serializes_for_offline_use() {
        let l = leaves(5);
        let tree = MerkleTree::build(l.clone()).unwrap();
        let proof = InclusionProof::generate(&tree, 1).unwrap();

        let json = serde_json::to_string(&proof).unwrap();
        assert!(json.contains("\"side\":\"left\""));
        let back: InclusionProof = serde_json::from_str(&json).unwrap();
        assert!(back.verify(&l[1], &tree.root()));
    }
}
