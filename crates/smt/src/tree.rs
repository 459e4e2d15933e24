//! Sparse Merkle Tree implementation

use std::{collections::HashMap, marker::PhantomData};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use veilchain_core::{
    Digest, EngineConfig, Error, HashAlgorithm, Result, Sha256Hasher, TreeHasher,
};

use crate::{
    MAX_DEPTH, SMT_FORMAT_VERSION,
    proof::{SmtLeaf, SmtProof},
};

/// Coordinate of a stored node.
///
/// `height` 0 is a leaf and `height == depth` is the root. `prefix` holds the
/// first `depth - height` path bits, the rest zeroed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct NodeKey {
    height: u16,
    prefix: Digest,
}

/// One non-default node in exported state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredNode {
    /// Levels above the leaves
    pub height: u16,
    /// Path prefix leading to the node
    pub prefix: Digest,
    /// Node digest
    pub digest: Digest,
}

/// Serializable sparse tree state: depth, algorithm, leaf owners and the
/// non-default nodes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseTreeState {
    /// Format version, see [`SMT_FORMAT_VERSION`]
    pub version: u8,
    /// Hash algorithm of the exporting tree
    pub algorithm: HashAlgorithm,
    /// Tree depth
    pub depth: usize,
    /// Occupied leaves ordered by key hash
    pub leaves: Vec<SmtLeaf>,
    /// Stored nodes ordered by height, then prefix
    pub nodes: Vec<StoredNode>,
}

/// Fixed-depth sparse Merkle tree over string keys.
///
/// Each key owns the leaf addressed by the first `depth` bits of its hash,
/// so the root depends only on the set of `(key, value)` pairs, never on
/// insertion order. A leaf belongs to the first key written to it; writing a
/// different key whose hash shares those bits fails with
/// [`Error::KeyCollision`].
#[derive(Clone, Debug)]
pub struct SparseMerkleTree<H: TreeHasher = Sha256Hasher> {
    depth: usize,
    /// `defaults[h]` is the digest of an empty subtree of height `h`
    defaults: Vec<Digest>,
    nodes: HashMap<NodeKey, Digest>,
    /// Owner of each occupied leaf, keyed by leaf prefix
    leaves: HashMap<Digest, SmtLeaf>,
    _hasher: PhantomData<H>,
}

impl<H: TreeHasher> SparseMerkleTree<H> {
    /// Create an empty tree of the given depth (`1..=256`)
    pub fn new(depth: usize) -> Result<Self> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(Error::InvalidDepth(depth));
        }
        let mut defaults = Vec::with_capacity(depth + 1);
        defaults.push(H::empty_digest());
        for height in 0..depth {
            let below = defaults[height];
            defaults.push(H::hash_pair(&below, &below));
        }
        Ok(Self {
            depth,
            defaults,
            nodes: HashMap::new(),
            leaves: HashMap::new(),
            _hasher: PhantomData,
        })
    }

    /// Create an empty tree from configuration
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        if config.hash_algorithm != H::ALGORITHM {
            return Err(Error::AlgorithmMismatch {
                expected: H::ALGORITHM,
                found: config.hash_algorithm,
            });
        }
        Self::new(config.smt_depth)
    }

    /// Tree depth
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Root digest; `default[depth]` when empty
    pub fn root(&self) -> Digest {
        self.node_or_default(self.depth, &Digest::ZERO)
    }

    /// Digest of an empty subtree of the given height
    pub fn default_digest(&self, height: usize) -> Option<Digest> {
        self.defaults.get(height).copied()
    }

    /// Number of stored (non-default) nodes, leaves included
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of stored leaves
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Set `key` to `value`, binding `hash(key)` and `hash(value)` into the
    /// key's leaf.
    ///
    /// Only the nodes on the key's path are recomputed. Returns the new root,
    /// or [`Error::KeyCollision`] without touching the tree when another key
    /// owns the leaf.
    pub fn set(&mut self, key: &str, value: impl AsRef<[u8]>) -> Result<Digest> {
        let path = H::hash(key.as_bytes());
        let prefix = path.truncated(self.depth);
        let owner = self.leaves.get(&prefix).map(|leaf| leaf.key_hash);
        if let Some(occupant) = owner.filter(|owner| *owner != path) {
            warn!(key, %occupant, depth = self.depth, "sparse tree key collision");
            return Err(Error::KeyCollision {
                key: key.to_string(),
                occupant,
            });
        }

        let leaf = SmtLeaf::new(path, H::hash(value.as_ref()));
        let mut current = leaf.digest::<H>();
        self.leaves.insert(prefix, leaf);
        self.nodes.insert(self.node_key(0, &path), current);

        for height in 0..self.depth {
            let sibling = self.sibling(height, &path);
            current = if self.is_right(height, &path) {
                H::hash_pair(&sibling, &current)
            } else {
                H::hash_pair(&current, &sibling)
            };
            self.nodes.insert(self.node_key(height + 1, &path), current);
        }

        debug!(key, depth = self.depth, root = %current, "sparse tree updated");
        Ok(current)
    }

    /// `hash(value)` stored for `key`
    pub fn get(&self, key: &str) -> Option<Digest> {
        let path = H::hash(key.as_bytes());
        self.owned_leaf(&path).map(|leaf| leaf.value)
    }

    /// Whether `key` has been set
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Inclusion proof for a set key, non-inclusion proof otherwise.
    ///
    /// When a different key owns the leaf the non-inclusion proof carries
    /// that occupant.
    pub fn get_proof(&self, key: &str) -> SmtProof {
        let path = H::hash(key.as_bytes());
        let (value, occupant) = match self.leaves.get(&path.truncated(self.depth)) {
            Some(leaf) if leaf.key_hash == path => (Some(leaf.value), None),
            Some(leaf) => (None, Some(*leaf)),
            None => (None, None),
        };
        let siblings = (0..self.depth)
            .map(|height| self.sibling(height, &path))
            .collect();
        SmtProof {
            key: key.to_string(),
            value,
            included: value.is_some(),
            occupant,
            siblings,
            root: self.root(),
        }
    }

    /// Check a proof against its own root
    pub fn verify(proof: &SmtProof) -> bool {
        proof.verify::<H>()
    }

    /// Drop every stored node
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.leaves.clear();
        debug!(depth = self.depth, "sparse tree cleared");
    }

    /// Snapshot the leaf owners and stored nodes
    pub fn export(&self) -> SparseTreeState {
        let mut leaves: Vec<_> = self.leaves.values().copied().collect();
        leaves.sort_by_key(|leaf| leaf.key_hash);
        let mut nodes: Vec<_> = self
            .nodes
            .iter()
            .map(|(key, digest)| StoredNode {
                height: key.height,
                prefix: key.prefix,
                digest: *digest,
            })
            .collect();
        nodes.sort_by_key(|node| (node.height, node.prefix));
        SparseTreeState {
            version: SMT_FORMAT_VERSION,
            algorithm: H::ALGORITHM,
            depth: self.depth,
            leaves,
            nodes,
        }
    }

    /// Rebuild a tree from exported state.
    ///
    /// Every leaf must match its owner record, every internal node is checked
    /// against its children and every non-root node must have its parent
    /// stored.
    pub fn import(state: &SparseTreeState) -> Result<Self> {
        if state.version != SMT_FORMAT_VERSION {
            return Err(Error::CorruptState(format!(
                "unsupported sparse tree format version {}",
                state.version
            )));
        }
        if state.algorithm != H::ALGORITHM {
            warn!(expected = %H::ALGORITHM, found = %state.algorithm, "rejected sparse tree state");
            return Err(Error::AlgorithmMismatch {
                expected: H::ALGORITHM,
                found: state.algorithm,
            });
        }

        let mut tree = Self::new(state.depth)?;
        for leaf in &state.leaves {
            let prefix = leaf.key_hash.truncated(tree.depth);
            if tree.leaves.insert(prefix, *leaf).is_some() {
                return Err(Error::CorruptState(format!(
                    "key hash {} shares its leaf with another owner",
                    leaf.key_hash
                )));
            }
        }
        for node in &state.nodes {
            let height = usize::from(node.height);
            if height > tree.depth {
                return Err(corrupt(node, "height exceeds depth"));
            }
            if node.prefix != node.prefix.truncated(tree.depth - height) {
                return Err(corrupt(node, "prefix has bits below its level"));
            }
            let key = NodeKey {
                height: node.height,
                prefix: node.prefix,
            };
            if tree.nodes.insert(key, node.digest).is_some() {
                return Err(corrupt(node, "duplicate node"));
            }
        }

        if let Err(err) = tree.check_integrity() {
            warn!(depth = tree.depth, nodes = tree.nodes.len(), %err, "rejected sparse tree state");
            return Err(err);
        }
        debug!(
            depth = tree.depth,
            leaves = tree.leaves.len(),
            nodes = tree.nodes.len(),
            root = %tree.root(),
            "imported sparse tree"
        );
        Ok(tree)
    }

    fn check_integrity(&self) -> Result<()> {
        for (prefix, leaf) in &self.leaves {
            let key = NodeKey {
                height: 0,
                prefix: *prefix,
            };
            if self.nodes.get(&key) != Some(&leaf.digest::<H>()) {
                return Err(Error::CorruptState(format!(
                    "leaf {prefix} does not match its owner record"
                )));
            }
        }

        for (key, digest) in &self.nodes {
            let height = usize::from(key.height);
            if height == 0 && !self.leaves.contains_key(&key.prefix) {
                return Err(Error::CorruptState(format!(
                    "leaf {} has no owner record",
                    key.prefix
                )));
            }
            if height < self.depth {
                let parent = self.parent_key(key);
                if !self.nodes.contains_key(&parent) {
                    return Err(Error::CorruptState(format!(
                        "node at height {height} prefix {} has no parent",
                        key.prefix
                    )));
                }
            }
            if height > 0 {
                let (left, right) = self.child_keys(key);
                if !self.nodes.contains_key(&left) && !self.nodes.contains_key(&right) {
                    return Err(Error::CorruptState(format!(
                        "internal node at height {height} prefix {} has no children",
                        key.prefix
                    )));
                }
                let below = self.defaults[height - 1];
                let left = self.nodes.get(&left).copied().unwrap_or(below);
                let right = self.nodes.get(&right).copied().unwrap_or(below);
                if H::hash_pair(&left, &right) != *digest {
                    return Err(Error::CorruptState(format!(
                        "node at height {height} prefix {} does not match its children",
                        key.prefix
                    )));
                }
            }
        }
        Ok(())
    }

    /// Leaf on `path` when the key hashing to `path` owns it
    fn owned_leaf(&self, path: &Digest) -> Option<&SmtLeaf> {
        self.leaves
            .get(&path.truncated(self.depth))
            .filter(|leaf| leaf.key_hash == *path)
    }

    /// Key of the node at `height` on `path`
    fn node_key(&self, height: usize, path: &Digest) -> NodeKey {
        NodeKey {
            height: height as u16,
            prefix: path.truncated(self.depth - height),
        }
    }

    /// Whether the node at `height` on `path` is a right child
    fn is_right(&self, height: usize, path: &Digest) -> bool {
        path.bit(self.depth - height - 1)
    }

    /// Sibling of the node at `height` on `path`
    fn sibling(&self, height: usize, path: &Digest) -> Digest {
        let bit = self.depth - height - 1;
        let prefix = path.truncated(self.depth - height).with_bit_flipped(bit);
        self.node_or_default(height, &prefix)
    }

    fn node_or_default(&self, height: usize, prefix: &Digest) -> Digest {
        let key = NodeKey {
            height: height as u16,
            prefix: *prefix,
        };
        self.nodes.get(&key).copied().unwrap_or(self.defaults[height])
    }

    fn parent_key(&self, key: &NodeKey) -> NodeKey {
        let height = usize::from(key.height) + 1;
        NodeKey {
            height: height as u16,
            prefix: key.prefix.truncated(self.depth - height),
        }
    }

    fn child_keys(&self, key: &NodeKey) -> (NodeKey, NodeKey) {
        let height = key.height - 1;
        let bit = self.depth - usize::from(key.height);
        let left = NodeKey {
            height,
            prefix: key.prefix,
        };
        let right = NodeKey {
            height,
            prefix: key.prefix.with_bit_flipped(bit),
        };
        (left, right)
    }
}

fn corrupt(node: &StoredNode, reason: &str) -> Error {
    Error::CorruptState(format!(
        "node at height {} prefix {}: {reason}",
        node.height, node.prefix
    ))
}
