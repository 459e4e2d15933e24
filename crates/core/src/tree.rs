//! Append-only Merkle tree
//!
//! Layer 0 holds the leaves. Layer `L + 1` pairs up layer `L`; a node without
//! a right partner is hashed with the empty digest (never duplicated). The
//! last layer holds the single root node. An empty tree's root is the empty
//! digest and a single-leaf tree's root is the leaf itself.

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    digest::Digest,
    error::{Error, Result},
    hasher::{HashAlgorithm, Sha256Hasher, TreeHasher},
    proof::{Direction, InclusionProof},
};

/// Build the full layer pyramid over `leaves`.
///
/// This is the reference construction; [`MerkleTree::append`] maintains the
/// same pyramid incrementally.
pub fn build_layers<H: TreeHasher>(leaves: Vec<Digest>) -> Vec<Vec<Digest>> {
    let empty = H::empty_digest();
    let mut layers = vec![leaves];
    loop {
        let next: Vec<Digest> = match layers.last() {
            Some(layer) if layer.len() > 1 => layer
                .chunks(2)
                .map(|pair| H::hash_pair(&pair[0], pair.get(1).unwrap_or(&empty)))
                .collect(),
            _ => break,
        };
        layers.push(next);
    }
    layers
}

/// Root of the tree over `leaves`, computed from scratch
pub fn compute_root<H: TreeHasher>(leaves: &[Digest]) -> Digest {
    build_layers::<H>(leaves.to_vec())
        .last()
        .and_then(|top| top.first().copied())
        .unwrap_or_else(H::empty_digest)
}

/// Convert a signed leaf index from an external boundary.
///
/// Negative indices fail with [`Error::OutOfRange`]; a tree without leaves
/// fails with [`Error::EmptyTree`]. The upper bound is checked by
/// [`MerkleTree::get_proof`].
pub fn leaf_index_from_signed(index: i64, size: u64) -> Result<u64> {
    if size == 0 {
        return Err(Error::EmptyTree);
    }
    u64::try_from(index).map_err(|_| Error::OutOfRange {
        index: index.into(),
        size,
    })
}

/// Serializable tree state: the leaf sequence and the algorithm that hashed it.
///
/// The pyramid is always derivable and is never exported.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeState {
    /// Hash algorithm of the exporting tree
    pub algorithm: HashAlgorithm,
    /// Leaves in insertion order
    pub leaves: Vec<Digest>,
}

/// Append-only Merkle tree over leaf digests
#[derive(Clone, Debug)]
pub struct MerkleTree<H: TreeHasher = Sha256Hasher> {
    /// `layers[0]` is the leaf sequence, the last layer holds the root
    layers: Vec<Vec<Digest>>,
    _hasher: PhantomData<H>,
}

impl<H: TreeHasher> MerkleTree<H> {
    /// Create an empty tree
    pub fn new() -> Self {
        Self {
            layers: vec![Vec::new()],
            _hasher: PhantomData,
        }
    }

    /// Build a tree over `leaves` with a single rebuild
    pub fn from_leaves(leaves: &[Digest]) -> Self {
        Self {
            layers: build_layers::<H>(leaves.to_vec()),
            _hasher: PhantomData,
        }
    }

    /// Current root; the empty digest for an empty tree
    pub fn root(&self) -> Digest {
        if self.is_empty() {
            return H::empty_digest();
        }
        self.layers
            .last()
            .and_then(|top| top.first().copied())
            .unwrap_or_else(H::empty_digest)
    }

    /// Number of leaves
    pub fn size(&self) -> u64 {
        self.leaves().len() as u64
    }

    /// `true` when no leaf has been appended
    pub fn is_empty(&self) -> bool {
        self.leaves().is_empty()
    }

    /// Number of layers above the leaves
    pub fn height(&self) -> usize {
        self.layers.len() - 1
    }

    /// Leaves in insertion order
    pub fn leaves(&self) -> &[Digest] {
        self.layers.first().map(Vec::as_slice).unwrap_or_default()
    }

    /// Nodes of one pyramid layer
    pub fn layer(&self, level: usize) -> Option<&[Digest]> {
        self.layers.get(level).map(Vec::as_slice)
    }

    /// Node at `index` of layer `level`
    pub fn node(&self, level: usize, index: u64) -> Option<Digest> {
        let index = usize::try_from(index).ok()?;
        self.layers.get(level)?.get(index).copied()
    }

    /// Append a leaf and return its index.
    ///
    /// Only the nodes on the right edge are recomputed; the resulting pyramid
    /// is identical to [`build_layers`] over the new leaf sequence.
    pub fn append(&mut self, leaf: Digest) -> u64 {
        let index = self.size();
        self.layers[0].push(leaf);
        self.refresh_right_edge();
        debug!(index, root = %self.root(), "appended leaf");
        index
    }

    /// Validate a hex digest and append it.
    ///
    /// The tree is left untouched when the digest is invalid.
    pub fn append_hex(&mut self, leaf: &str) -> Result<u64> {
        let leaf = Digest::from_hex(leaf)?;
        Ok(self.append(leaf))
    }

    /// Append several leaves with a single rebuild and return the index of the
    /// first one.
    pub fn append_batch(&mut self, leaves: &[Digest]) -> u64 {
        let start = self.size();
        if leaves.is_empty() {
            return start;
        }
        let mut all = std::mem::take(&mut self.layers[0]);
        all.extend_from_slice(leaves);
        self.layers = build_layers::<H>(all);
        debug!(start, count = leaves.len(), root = %self.root(), "appended leaf batch");
        start
    }

    /// Recompute the rightmost node of every layer after a push to layer 0.
    fn refresh_right_edge(&mut self) {
        let empty = H::empty_digest();
        let mut level = 0;
        while self.layers[level].len() > 1 {
            let layer = &self.layers[level];
            let last = layer.len() - 1;
            let left = last & !1;
            let parent = H::hash_pair(&layer[left], layer.get(left + 1).unwrap_or(&empty));
            let parent_index = last / 2;

            if self.layers.len() == level + 1 {
                self.layers.push(Vec::new());
            }
            let next = &mut self.layers[level + 1];
            if parent_index < next.len() {
                next[parent_index] = parent;
            } else {
                next.push(parent);
            }
            level += 1;
        }
    }

    /// Root over the first `size` leaves, recomputed with the same pyramid rule
    pub fn root_at(&self, size: u64) -> Result<Digest> {
        if size > self.size() {
            return Err(Error::SizeExceedsTree {
                old_size: size,
                tree_size: self.size(),
            });
        }
        Ok(compute_root::<H>(&self.leaves()[..size as usize]))
    }

    /// Audit path for the leaf at `index`
    pub fn get_proof(&self, index: u64) -> Result<InclusionProof> {
        let size = self.size();
        if size == 0 {
            return Err(Error::EmptyTree);
        }
        if index >= size {
            return Err(Error::OutOfRange {
                index: index.into(),
                size,
            });
        }

        let empty = H::empty_digest();
        let mut position = index as usize;
        let mut siblings = Vec::with_capacity(self.height());
        let mut directions = Vec::with_capacity(self.height());

        for layer in &self.layers[..self.height()] {
            if position % 2 == 1 {
                siblings.push(layer[position - 1]);
                directions.push(Direction::Left);
            } else {
                siblings.push(layer.get(position + 1).copied().unwrap_or(empty));
                directions.push(Direction::Right);
            }
            position /= 2;
        }

        debug!(index, size, path_len = siblings.len(), "generated inclusion proof");
        Ok(InclusionProof {
            leaf: self.leaves()[index as usize],
            index,
            siblings,
            directions,
            root: self.root(),
        })
    }

    /// Verify an inclusion proof produced with this tree's hasher.
    pub fn verify(proof: &InclusionProof) -> bool {
        proof.verify::<H>()
    }

    /// Snapshot the leaf sequence
    pub fn export(&self) -> TreeState {
        TreeState {
            algorithm: H::ALGORITHM,
            leaves: self.leaves().to_vec(),
        }
    }

    /// Rebuild a tree from exported state. The state is copied, never shared.
    pub fn import(state: &TreeState) -> Result<Self> {
        if state.algorithm != H::ALGORITHM {
            warn!(expected = %H::ALGORITHM, found = %state.algorithm, "rejected tree state");
            return Err(Error::AlgorithmMismatch {
                expected: H::ALGORITHM,
                found: state.algorithm,
            });
        }
        let tree = Self::from_leaves(&state.leaves);
        debug!(size = tree.size(), root = %tree.root(), "imported tree state");
        Ok(tree)
    }
}

impl<H: TreeHasher> Default for MerkleTree<H> {
    fn default() -> Self {
        Self::new()
    }
}
