//! SMT proof verification

use serde::{Deserialize, Serialize};
use veilchain_core::{Digest, Error, Result, TreeHasher};

use crate::MAX_DEPTH;

/// Domain prefix of leaf preimages, keeping them apart from `hash("")`
const LEAF_PREFIX: u8 = 0x00;

/// Key and value bound into an occupied leaf
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtLeaf {
    /// `hash(key)` of the owning key
    pub key_hash: Digest,
    /// `hash(value)` stored for it
    pub value: Digest,
}

impl SmtLeaf {
    /// Record `value` as owned by the key hashing to `key_hash`
    pub const fn new(key_hash: Digest, value: Digest) -> Self {
        Self { key_hash, value }
    }

    /// Leaf node digest: `hash(0x00 || key_hash || value)`
    pub fn digest<H: TreeHasher>(&self) -> Digest {
        let mut preimage = [LEAF_PREFIX; 65];
        preimage[1..33].copy_from_slice(self.key_hash.as_bytes());
        preimage[33..].copy_from_slice(self.value.as_bytes());
        H::hash(&preimage)
    }
}

/// Inclusion or non-inclusion proof for one key
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtProof {
    /// The key being proven
    pub key: String,
    /// `hash(value)` stored for the key, `None` when absent
    pub value: Option<Digest>,
    /// Whether the key is set
    pub included: bool,
    /// Leaf owned by a different key whose hash shares the key's path.
    ///
    /// Only present on non-inclusion proofs whose leaf is occupied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupant: Option<SmtLeaf>,
    /// Sibling digests from the leaf up to the root, one per level
    pub siblings: Vec<Digest>,
    /// Root the proof claims to reach
    pub root: Digest,
}

impl SmtProof {
    /// Parse a JSON proof record
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::MalformedProof(e.to_string()))
    }

    /// Depth of the tree the proof was taken from
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    /// Fold the siblings onto the leaf along the key's path.
    ///
    /// Returns `None` when the proof shape is unusable: a depth outside
    /// `1..=256`, `included` disagreeing with `value`, or an occupant that is
    /// the key itself or lives on another path.
    pub fn compute_root<H: TreeHasher>(&self) -> Option<Digest> {
        let depth = self.siblings.len();
        if depth == 0 || depth > MAX_DEPTH {
            return None;
        }

        let path = H::hash(self.key.as_bytes());
        let leaf = match (self.included, self.value, self.occupant) {
            (true, Some(value), None) => SmtLeaf::new(path, value).digest::<H>(),
            (false, None, None) => H::empty_digest(),
            (false, None, Some(occupant))
                if occupant.key_hash != path
                    && occupant.key_hash.truncated(depth) == path.truncated(depth) =>
            {
                occupant.digest::<H>()
            }
            _ => return None,
        };

        let root = self.siblings.iter().enumerate().fold(leaf, |current, (height, sibling)| {
            if path.bit(depth - height - 1) {
                H::hash_pair(sibling, &current)
            } else {
                H::hash_pair(&current, sibling)
            }
        });
        Some(root)
    }

    /// Check the proof against its own `root`
    pub fn verify<H: TreeHasher>(&self) -> bool {
        self.compute_root::<H>().is_some_and(|root| root == self.root)
    }
}
