//! Compact inclusion proof encoding
//!
//! Single-letter fields, sibling digests concatenated into one hex string and
//! directions packed as a `'0'`/`'1'` string. Used for storage and QR-sized
//! transport.

use serde::{Deserialize, Serialize};

use crate::{
    digest::{DIGEST_HEX_LEN, Digest},
    error::{Error, Result},
    proof::{Direction, InclusionProof},
};

/// Current compact proof format version
pub const COMPACT_PROOF_VERSION: u8 = 1;

/// Compact form of an [`InclusionProof`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactProof {
    /// Format version
    pub v: u8,
    /// Leaf digest
    pub l: Digest,
    /// Root digest
    pub r: Digest,
    /// Leaf index
    pub i: u64,
    /// Concatenated sibling digests
    pub p: String,
    /// Direction bits, `'0'` = left, `'1'` = right
    pub d: String,
}

impl From<&InclusionProof> for CompactProof {
    fn from(proof: &InclusionProof) -> Self {
        Self {
            v: COMPACT_PROOF_VERSION,
            l: proof.leaf,
            r: proof.root,
            i: proof.index,
            p: proof.siblings.iter().map(Digest::to_hex).collect(),
            d: proof.directions.iter().map(Direction::as_bit).collect(),
        }
    }
}

impl TryFrom<&CompactProof> for InclusionProof {
    type Error = Error;

    fn try_from(compact: &CompactProof) -> Result<Self> {
        if compact.v != COMPACT_PROOF_VERSION {
            return Err(Error::MalformedProof(format!(
                "unsupported compact proof version {}",
                compact.v
            )));
        }
        if compact.p.len() % DIGEST_HEX_LEN != 0 {
            return Err(Error::MalformedProof(format!(
                "sibling string length {} is not a multiple of {DIGEST_HEX_LEN}",
                compact.p.len()
            )));
        }

        let siblings = compact
            .p
            .as_bytes()
            .chunks(DIGEST_HEX_LEN)
            .map(|chunk| {
                std::str::from_utf8(chunk)
                    .map_err(|e| Error::MalformedProof(e.to_string()))
                    .and_then(|s| {
                        Digest::from_hex(s).map_err(|e| Error::MalformedProof(e.to_string()))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let directions = compact
            .d
            .chars()
            .map(|bit| {
                Direction::from_bit(bit).ok_or_else(|| {
                    Error::MalformedProof(format!("invalid direction bit {bit:?}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if siblings.len() != directions.len() {
            return Err(Error::MalformedProof(format!(
                "{} siblings but {} direction bits",
                siblings.len(),
                directions.len()
            )));
        }

        Ok(Self {
            leaf: compact.l,
            index: compact.i,
            siblings,
            directions,
            root: compact.r,
        })
    }
}

impl CompactProof {
    /// Parse a JSON compact proof record
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::MalformedProof(e.to_string()))
    }

    /// Expand into a full proof
    pub fn expand(&self) -> Result<InclusionProof> {
        InclusionProof::try_from(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hasher::{Sha256Hasher, TreeHasher},
        tree::MerkleTree,
    };

    fn sample_proof() -> InclusionProof {
        let leaves: Vec<_> = (0u8..5).map(|i| Sha256Hasher::hash(&[i])).collect();
        let tree = MerkleTree::<Sha256Hasher>::from_leaves(&leaves);
        tree.get_proof(4).unwrap()
    }

    #[test]
    fn test_compact_round_trip() {
        let proof = sample_proof();
        let compact = proof.to_compact();
        assert_eq!(compact.v, COMPACT_PROOF_VERSION);
        assert_eq!(compact.p.len(), proof.siblings.len() * DIGEST_HEX_LEN);
        assert_eq!(compact.d, "110");

        let expanded = compact.expand().unwrap();
        assert_eq!(expanded, proof);
        assert!(expanded.verify::<Sha256Hasher>());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut compact = sample_proof().to_compact();
        compact.v = 2;
        assert!(matches!(compact.expand(), Err(Error::MalformedProof(_))));
    }

    #[test]
    fn test_rejects_truncated_siblings() {
        let mut compact = sample_proof().to_compact();
        compact.p.pop();
        assert!(matches!(compact.expand(), Err(Error::MalformedProof(_))));
    }

    #[test]
    fn test_rejects_bad_direction_bits() {
        let mut compact = sample_proof().to_compact();
        compact.d = "1x1".to_string();
        assert!(matches!(compact.expand(), Err(Error::MalformedProof(_))));

        compact.d = "11".to_string();
        assert!(matches!(compact.expand(), Err(Error::MalformedProof(_))));
    }
}
