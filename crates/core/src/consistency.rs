//! Consistency proofs between two snapshots of an append-only tree
//!
//! A node at layer `L`, index `j` covers leaves `[j * 2^L, (j + 1) * 2^L)`.
//! When that range lies inside the tree the node is a complete subtree and
//! has the same digest in every tree that contains those leaves. A proof from
//! size `m` to size `n` lists the complete subtrees partitioning `[0, m)`
//! (omitted when `m` is a power of two, the old root already is one) followed
//! by the complete subtrees partitioning `[m, n)`. Both partitions are a pure
//! function of `(m, n)`, so the verifier knows exactly which digest covers
//! which range, rebuilds both roots with the empty-digest padding implied by
//! each size, and compares them with the claimed roots.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    digest::Digest,
    error::{Error, Result},
    hasher::TreeHasher,
    tree::MerkleTree,
};

/// Proof that the tree of `new_size` leaves extends the tree of `old_size`
/// leaves without modifying it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyProof {
    /// Root of the earlier snapshot
    pub old_root: Digest,
    /// Size of the earlier snapshot
    pub old_size: u64,
    /// Root of the later snapshot
    pub new_root: Digest,
    /// Size of the later snapshot
    pub new_size: u64,
    /// Complete subtree digests, left to right
    pub path: Vec<Digest>,
}

/// Position of a pyramid node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct NodeId {
    level: u32,
    index: u64,
}

impl NodeId {
    /// Root node of a tree with `size` leaves
    fn root_of(size: u64) -> Self {
        let level = size.saturating_sub(1).checked_ilog2().map_or(0, |bits| bits + 1);
        Self { level, index: 0 }
    }

    /// First leaf covered by this node
    fn start(self) -> u128 {
        u128::from(self.index) << self.level
    }

    fn children(self) -> (Self, Self) {
        let level = self.level - 1;
        let left = Self {
            level,
            index: self.index * 2,
        };
        let right = Self {
            level,
            index: self.index * 2 + 1,
        };
        (left, right)
    }
}

/// Complete subtrees partitioning `[start, end)`, left to right, each the
/// largest aligned block that fits at its position.
fn aligned_cover(start: u64, end: u64) -> Vec<NodeId> {
    let mut cover = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let mut level = cursor.trailing_zeros().min(63);
        while (1u64 << level) > end - cursor {
            level -= 1;
        }
        cover.push(NodeId {
            level,
            index: cursor >> level,
        });
        cursor += 1u64 << level;
    }
    cover
}

/// Rebuild the root of a `size`-leaf tree from digests of complete subtrees
/// that partition `[0, size)`.
fn fold_cover<H: TreeHasher>(nodes: &[(NodeId, Digest)], size: u64) -> Option<Digest> {
    fn node_digest<H: TreeHasher>(
        id: NodeId,
        size: u64,
        nodes: &[(NodeId, Digest)],
        empty: &Digest,
    ) -> Option<Digest> {
        if let Some((_, digest)) = nodes.iter().find(|(node, _)| *node == id) {
            return Some(*digest);
        }
        if id.level == 0 {
            return None;
        }
        let (left, right) = id.children();
        let left = node_digest::<H>(left, size, nodes, empty)?;
        let right = if right.start() < u128::from(size) {
            node_digest::<H>(right, size, nodes, empty)?
        } else {
            *empty
        };
        Some(H::hash_pair(&left, &right))
    }

    node_digest::<H>(NodeId::root_of(size), size, nodes, &H::empty_digest())
}

/// Convert a signed snapshot size from an external boundary
pub fn size_from_signed(size: i64) -> Result<u64> {
    u64::try_from(size).map_err(|_| Error::InvalidSize(size))
}

impl ConsistencyProof {
    /// Prove that `tree` extends the snapshot `(old_root, old_size)`.
    ///
    /// Fails with [`Error::SizeExceedsTree`] when the snapshot is larger than
    /// the tree and with [`Error::ChainModified`] when the tree's first
    /// `old_size` leaves no longer hash to `old_root`.
    pub fn generate<H: TreeHasher>(
        old_root: Digest,
        old_size: u64,
        tree: &MerkleTree<H>,
    ) -> Result<Self> {
        let new_size = tree.size();
        let new_root = tree.root();
        if old_size > new_size {
            return Err(Error::SizeExceedsTree {
                old_size,
                tree_size: new_size,
            });
        }

        // Nothing precedes position 0, so any claimed root is consistent.
        if old_size == 0 {
            return Ok(Self {
                old_root,
                old_size,
                new_root,
                new_size,
                path: Vec::new(),
            });
        }

        let actual = tree.root_at(old_size)?;
        if actual != old_root {
            warn!(old_size, expected = %old_root, %actual, "history rewritten before snapshot");
            return Err(Error::ChainModified {
                old_size,
                expected: old_root,
                actual,
            });
        }

        let mut path = Vec::new();
        if old_size < new_size {
            let old_cover = if old_size.is_power_of_two() {
                Vec::new()
            } else {
                aligned_cover(0, old_size)
            };
            for id in old_cover.into_iter().chain(aligned_cover(old_size, new_size)) {
                let digest = tree.node(id.level as usize, id.index).ok_or_else(|| {
                    Error::CorruptState(format!(
                        "missing node at layer {} index {}",
                        id.level, id.index
                    ))
                })?;
                path.push(digest);
            }
        }

        debug!(old_size, new_size, path_len = path.len(), "generated consistency proof");
        Ok(Self {
            old_root,
            old_size,
            new_root,
            new_size,
            path,
        })
    }

    /// Check the proof using only its own fields.
    ///
    /// Returns `false` for any inconsistency; never errors.
    pub fn verify<H: TreeHasher>(&self) -> bool {
        let (old_size, new_size) = (self.old_size, self.new_size);
        if old_size > new_size {
            return false;
        }
        if old_size == 0 {
            return self.path.is_empty();
        }
        if old_size == new_size {
            return self.path.is_empty() && self.old_root == self.new_root;
        }

        let mut digests = self.path.iter().copied();
        let mut old_nodes = Vec::new();
        if old_size.is_power_of_two() {
            old_nodes.push((NodeId::root_of(old_size), self.old_root));
        } else {
            for id in aligned_cover(0, old_size) {
                let Some(digest) = digests.next() else {
                    return false;
                };
                old_nodes.push((id, digest));
            }
        }

        let mut new_nodes = old_nodes.clone();
        for id in aligned_cover(old_size, new_size) {
            let Some(digest) = digests.next() else {
                return false;
            };
            new_nodes.push((id, digest));
        }
        if digests.next().is_some() {
            return false;
        }

        fold_cover::<H>(&old_nodes, old_size) == Some(self.old_root)
            && fold_cover::<H>(&new_nodes, new_size) == Some(self.new_root)
    }

    /// Human-readable summary including the verification outcome
    pub fn describe<H: TreeHasher>(&self) -> String {
        let status = if self.verify::<H>() {
            "VALID"
        } else {
            "INVALID"
        };
        let appended = self.new_size.saturating_sub(self.old_size);
        [
            format!("Consistency proof ({status})"),
            format!("  old root: {} ({} entries)", self.old_root, self.old_size),
            format!("  new root: {} ({} entries)", self.new_root, self.new_size),
            format!("  appended: {appended} entries"),
            format!("  path: {} digests", self.path.len()),
        ]
        .join("\n")
    }

    /// Parse a JSON proof record, reporting shape errors as
    /// [`Error::MalformedProof`]
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::MalformedProof(e.to_string()))
    }
}

/// Check that `tree` is the snapshot `(new_root, new_size)` and that it
/// extends `(old_root, old_size)`.
pub fn verify_against_tree<H: TreeHasher>(
    old_root: Digest,
    old_size: u64,
    new_root: Digest,
    new_size: u64,
    tree: &MerkleTree<H>,
) -> bool {
    if tree.root() != new_root || tree.size() != new_size {
        return false;
    }
    ConsistencyProof::generate(old_root, old_size, tree).is_ok_and(|proof| proof.verify::<H>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::{Blake3Hasher, Sha256Hasher};

    fn leaf(n: u64) -> Digest {
        Sha256Hasher::hash(&n.to_be_bytes())
    }

    fn tree_of(n: u64) -> MerkleTree {
        MerkleTree::from_leaves(&(0..n).map(leaf).collect::<Vec<_>>())
    }

    #[test]
    fn test_aligned_cover() {
        let ids = |cover: Vec<NodeId>| {
            cover.into_iter().map(|id| (id.level, id.index)).collect::<Vec<_>>()
        };
        assert_eq!(ids(aligned_cover(0, 6)), vec![(2, 0), (1, 2)]);
        assert_eq!(ids(aligned_cover(3, 8)), vec![(0, 3), (2, 1)]);
        assert_eq!(ids(aligned_cover(5, 6)), vec![(0, 5)]);
        assert!(aligned_cover(4, 4).is_empty());
    }

    #[test]
    fn test_root_of() {
        assert_eq!(NodeId::root_of(1).level, 0);
        assert_eq!(NodeId::root_of(2).level, 1);
        assert_eq!(NodeId::root_of(3).level, 2);
        assert_eq!(NodeId::root_of(4).level, 2);
        assert_eq!(NodeId::root_of(5).level, 3);
    }

    #[test]
    fn test_fold_cover_matches_tree() {
        for n in 1..40 {
            let tree = tree_of(n);
            let nodes: Vec<_> = aligned_cover(0, n)
                .into_iter()
                .map(|id| (id, tree.node(id.level as usize, id.index).unwrap()))
                .collect();
            assert_eq!(fold_cover::<Sha256Hasher>(&nodes, n), Some(tree.root()), "size {n}");
        }
    }

    #[test]
    fn test_every_prefix_is_consistent() {
        let mut tree = MerkleTree::<Sha256Hasher>::new();
        let mut snapshots = vec![(tree.root(), 0)];
        for i in 0..40 {
            tree.append(leaf(i));
            snapshots.push((tree.root(), tree.size()));
        }
        for (root, size) in snapshots {
            let proof = ConsistencyProof::generate(root, size, &tree).unwrap();
            assert_eq!(proof.new_root, tree.root());
            assert!(proof.verify::<Sha256Hasher>(), "old size {size}");
            assert!(verify_against_tree(root, size, tree.root(), tree.size(), &tree));
        }
    }

    #[test]
    fn test_every_pair_of_sizes() {
        for n in 1..=24 {
            let tree = tree_of(n);
            for m in 0..=n {
                let old_root = tree.root_at(m).unwrap();
                let proof = ConsistencyProof::generate(old_root, m, &tree).unwrap();
                assert!(proof.verify::<Sha256Hasher>(), "m {m} n {n}");
            }
        }
    }

    #[test]
    fn test_degenerate_sizes() {
        let tree = tree_of(6);

        let proof = ConsistencyProof::generate(Digest::ZERO, 0, &tree).unwrap();
        assert!(proof.path.is_empty());
        assert!(proof.verify::<Sha256Hasher>());

        let proof = ConsistencyProof::generate(tree.root(), 6, &tree).unwrap();
        assert!(proof.path.is_empty());
        assert!(proof.verify::<Sha256Hasher>());

        let err = ConsistencyProof::generate(Digest::ZERO, 6, &tree).unwrap_err();
        assert!(err.is_tamper_evidence());
    }

    #[test]
    fn test_size_exceeds_tree() {
        let tree = tree_of(3);
        let err = ConsistencyProof::generate(tree.root(), 4, &tree).unwrap_err();
        assert!(matches!(
            err,
            Error::SizeExceedsTree {
                old_size: 4,
                tree_size: 3
            }
        ));
        assert!(matches!(size_from_signed(-1), Err(Error::InvalidSize(-1))));
        assert_eq!(size_from_signed(7).unwrap(), 7);
    }

    #[test]
    fn test_rewritten_history_is_detected() {
        let original = tree_of(10);
        let old_root = original.root_at(6).unwrap();

        let mut leaves = original.leaves().to_vec();
        leaves[2] = Sha256Hasher::hash(b"forged");
        let forged = MerkleTree::<Sha256Hasher>::from_leaves(&leaves);
        let err = ConsistencyProof::generate(old_root, 6, &forged).unwrap_err();
        assert!(matches!(err, Error::ChainModified { old_size: 6, .. }));
        assert!(err.is_tamper_evidence());

        let mut leaves = original.leaves().to_vec();
        leaves.swap(0, 1);
        let reordered = MerkleTree::<Sha256Hasher>::from_leaves(&leaves);
        assert!(ConsistencyProof::generate(old_root, 6, &reordered).is_err());
        assert!(!verify_against_tree(old_root, 6, reordered.root(), 10, &reordered));

        // Leaves after the snapshot may change freely.
        let mut leaves = original.leaves().to_vec();
        leaves[8] = Sha256Hasher::hash(b"later");
        let extended = MerkleTree::<Sha256Hasher>::from_leaves(&leaves);
        assert!(ConsistencyProof::generate(old_root, 6, &extended).is_ok());
    }

    #[test]
    fn test_any_field_mutation_fails() {
        for (m, n) in [(3u64, 4u64), (2, 3), (5, 13), (4, 9), (1, 7), (6, 8)] {
            let tree = tree_of(n);
            let proof = ConsistencyProof::generate(tree.root_at(m).unwrap(), m, &tree).unwrap();
            assert!(proof.verify::<Sha256Hasher>());

            let mut bad = proof.clone();
            bad.old_root = bad.old_root.with_bit_flipped(7);
            assert!(!bad.verify::<Sha256Hasher>(), "old root m {m} n {n}");

            let mut bad = proof.clone();
            bad.new_root = bad.new_root.with_bit_flipped(7);
            assert!(!bad.verify::<Sha256Hasher>(), "new root m {m} n {n}");

            for delta in [1u64, 2] {
                let mut bad = proof.clone();
                bad.new_size += delta;
                assert!(!bad.verify::<Sha256Hasher>(), "new size +{delta} m {m} n {n}");

                let mut bad = proof.clone();
                bad.old_size += delta;
                assert!(!bad.verify::<Sha256Hasher>(), "old size +{delta} m {m} n {n}");
            }

            let mut bad = proof.clone();
            bad.old_size -= 1;
            assert!(!bad.verify::<Sha256Hasher>(), "old size -1 m {m} n {n}");

            let mut bad = proof.clone();
            bad.new_size -= 1;
            assert!(!bad.verify::<Sha256Hasher>(), "new size -1 m {m} n {n}");

            for j in 0..proof.path.len() {
                let mut bad = proof.clone();
                bad.path[j] = bad.path[j].with_bit_flipped(100);
                assert!(!bad.verify::<Sha256Hasher>(), "path {j} m {m} n {n}");
            }

            let mut bad = proof.clone();
            bad.path.pop();
            assert!(!bad.verify::<Sha256Hasher>());

            let mut bad = proof;
            bad.path.push(Digest::ZERO);
            assert!(!bad.verify::<Sha256Hasher>());
        }
    }

    #[test]
    fn test_verify_rejects_inverted_sizes() {
        let tree = tree_of(5);
        let mut proof = ConsistencyProof::generate(tree.root_at(2).unwrap(), 2, &tree).unwrap();
        proof.old_size = 6;
        assert!(!proof.verify::<Sha256Hasher>());
    }

    #[test]
    fn test_verify_against_tree_checks_snapshot() {
        let tree = tree_of(8);
        let old_root = tree.root_at(5).unwrap();
        assert!(verify_against_tree(old_root, 5, tree.root(), 8, &tree));
        assert!(!verify_against_tree(old_root, 5, tree.root(), 7, &tree));
        assert!(!verify_against_tree(old_root, 5, Digest::ZERO, 8, &tree));
        assert!(!verify_against_tree(Digest::ZERO, 5, tree.root(), 8, &tree));
    }

    #[test]
    fn test_wrong_hasher_fails() {
        let tree = tree_of(9);
        let proof = ConsistencyProof::generate(tree.root_at(5).unwrap(), 5, &tree).unwrap();
        assert!(!proof.verify::<Blake3Hasher>());
    }

    #[test]
    fn test_describe_and_json() {
        let tree = tree_of(7);
        let proof = ConsistencyProof::generate(tree.root_at(3).unwrap(), 3, &tree).unwrap();
        let text = proof.describe::<Sha256Hasher>();
        assert!(text.contains("VALID"));
        assert!(text.contains("(3 entries)"));
        assert!(text.contains("(7 entries)"));

        let json = serde_json::to_string(&proof).unwrap();
        assert!(json.contains("\"oldRoot\""));
        assert_eq!(ConsistencyProof::from_json(&json).unwrap(), proof);

        let mut bad = proof;
        bad.path.clear();
        assert!(bad.describe::<Sha256Hasher>().contains("INVALID"));
        assert!(matches!(ConsistencyProof::from_json("{}"), Err(Error::MalformedProof(_))));
    }
}
