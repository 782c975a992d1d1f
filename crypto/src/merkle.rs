//! Merkle root computation.
//!
//! Two flavors:
//!
//! - [`merkle_root`] — the root of a fixed list of leaf digests, used for
//!   per-block transaction and action roots.
//! - [`IncrementalMerkle`] — an append-only accumulator over the whole
//!   chain's block ids, kept on dynamic global properties. Stores only the
//!   roots of the complete subtrees (one per set bit of the leaf count), so
//!   appending is O(log n) and the struct serializes in a few hundred bytes.

use crate::hash::digest_parts;
use cascade_types::Digest;
use serde::{Deserialize, Serialize};

fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    digest_parts(&[left.as_bytes(), right.as_bytes()])
}

/// Compute the merkle root of a list of digests.
///
/// An odd node at any level is paired with a copy of itself. The empty
/// list hashes to the zero digest.
pub fn merkle_root(leaves: &[Digest]) -> Digest {
    if leaves.is_empty() {
        return Digest::ZERO;
    }
    let mut level: Vec<Digest> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1];
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

/// Append-only merkle accumulator.
///
/// `peaks[i]` is the root of a complete subtree; subtree sizes strictly
/// decrease left to right, matching the binary decomposition of
/// `leaf_count`.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IncrementalMerkle {
    leaf_count: u64,
    peaks: Vec<Digest>,
}

impl IncrementalMerkle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    /// Append a leaf, merging complete subtrees like a binary carry chain.
    pub fn append(&mut self, leaf: Digest) {
        let mut node = leaf;
        let mut count = self.leaf_count;
        while count & 1 == 1 {
            // the rightmost peak has the same height as `node`; merge them
            let left = self
                .peaks
                .pop()
                .unwrap_or(Digest::ZERO);
            node = hash_pair(&left, &node);
            count >>= 1;
        }
        self.peaks.push(node);
        self.leaf_count += 1;
    }

    /// The current root: right-to-left fold over the peaks. Zero when empty.
    pub fn root(&self) -> Digest {
        let Some((last, rest)) = self.peaks.split_last() else {
            return Digest::ZERO;
        };
        rest.iter()
            .rev()
            .fold(*last, |acc, peak| hash_pair(peak, &acc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::digest;

    fn leaf(n: u8) -> Digest {
        digest(&[n])
    }

    #[test]
    fn empty_root_is_zero() {
        assert_eq!(merkle_root(&[]), Digest::ZERO);
        assert_eq!(IncrementalMerkle::new().root(), Digest::ZERO);
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        assert_eq!(merkle_root(&[leaf(1)]), leaf(1));
    }

    #[test]
    fn two_leaves_hash_as_pair() {
        let expected = hash_pair(&leaf(1), &leaf(2));
        assert_eq!(merkle_root(&[leaf(1), leaf(2)]), expected);
    }

    #[test]
    fn odd_leaf_is_duplicated() {
        let ab = hash_pair(&leaf(1), &leaf(2));
        let cc = hash_pair(&leaf(3), &leaf(3));
        assert_eq!(merkle_root(&[leaf(1), leaf(2), leaf(3)]), hash_pair(&ab, &cc));
    }

    #[test]
    fn order_matters() {
        assert_ne!(
            merkle_root(&[leaf(1), leaf(2)]),
            merkle_root(&[leaf(2), leaf(1)])
        );
    }

    #[test]
    fn incremental_is_deterministic() {
        let mut a = IncrementalMerkle::new();
        let mut b = IncrementalMerkle::new();
        for i in 0..20 {
            a.append(leaf(i));
            b.append(leaf(i));
            assert_eq!(a.root(), b.root());
        }
        assert_eq!(a.leaf_count(), 20);
    }

    #[test]
    fn incremental_root_changes_per_append() {
        let mut acc = IncrementalMerkle::new();
        let mut seen = Vec::new();
        for i in 0..8 {
            acc.append(leaf(i));
            let root = acc.root();
            assert!(!seen.contains(&root));
            seen.push(root);
        }
    }

    #[test]
    fn power_of_two_matches_plain_merkle() {
        // for complete trees the accumulator equals the plain computation
        let leaves: Vec<Digest> = (0..8).map(leaf).collect();
        let mut acc = IncrementalMerkle::new();
        for l in &leaves {
            acc.append(*l);
        }
        assert_eq!(acc.root(), merkle_root(&leaves));
    }
}
