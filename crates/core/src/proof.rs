//! Inclusion proofs (audit paths) for the append-only tree

use serde::{Deserialize, Serialize};

use crate::{
    compact::CompactProof,
    digest::Digest,
    error::{Error, Result},
    hasher::TreeHasher,
};

/// Side on which a sibling is combined when climbing one layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sibling is the left operand
    Left,
    /// Sibling is the right operand
    Right,
}

impl Direction {
    /// Compact encoding: `'0'` for left, `'1'` for right
    pub const fn as_bit(&self) -> char {
        match self {
            Self::Left => '0',
            Self::Right => '1',
        }
    }

    /// Decode a compact direction bit
    pub const fn from_bit(bit: char) -> Option<Self> {
        match bit {
            '0' => Some(Self::Left),
            '1' => Some(Self::Right),
            _ => None,
        }
    }
}

/// Audit path proving that `leaf` sits at `index` in the tree with `root`.
///
/// `siblings[i]` is combined with the running digest when climbing from layer
/// `i` to `i + 1`, on the side given by `directions[i]`. A `Right` sibling equal
/// to the empty digest marks a layer where the node had no real partner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    /// Leaf digest being proven
    pub leaf: Digest,
    /// Position of the leaf; informational, not used when folding
    pub index: u64,
    /// Sibling digests from the leaf layer upwards
    #[serde(alias = "proof")]
    pub siblings: Vec<Digest>,
    /// Side of each sibling
    pub directions: Vec<Direction>,
    /// Root the proof claims to reach
    pub root: Digest,
}

impl InclusionProof {
    /// Parse a JSON proof record.
    ///
    /// Missing fields or badly encoded digests are reported as
    /// [`Error::MalformedProof`]. The SDK's `proof` field name is
    /// accepted for `siblings`.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::MalformedProof(e.to_string()))
    }

    /// Number of sibling digests
    pub fn len(&self) -> usize {
        self.siblings.len()
    }

    /// `true` for the proof of a single-leaf tree
    pub fn is_empty(&self) -> bool {
        self.siblings.is_empty()
    }

    /// Fold the siblings onto the leaf.
    ///
    /// Returns `None` when `siblings` and `directions` differ in length.
    pub fn compute_root<H: TreeHasher>(&self) -> Option<Digest> {
        if self.siblings.len() != self.directions.len() {
            return None;
        }
        let root = self.siblings.iter().zip(&self.directions).fold(
            self.leaf,
            |current, (sibling, direction)| match direction {
                Direction::Left => H::hash_pair(sibling, &current),
                Direction::Right => H::hash_pair(&current, sibling),
            },
        );
        Some(root)
    }

    /// Check the proof against its own `root`.
    pub fn verify<H: TreeHasher>(&self) -> bool {
        self.compute_root::<H>().is_some_and(|root| root == self.root)
    }

    /// Verify and explain the outcome
    pub fn report<H: TreeHasher>(&self) -> VerificationReport {
        let error = match self.compute_root::<H>() {
            None => Some("proof and directions arrays must have the same length"),
            Some(root) if root != self.root => Some("computed root does not match expected root"),
            Some(_) => None,
        };
        VerificationReport {
            valid: error.is_none(),
            leaf: self.leaf,
            root: self.root,
            index: self.index,
            proof_length: self.siblings.len(),
            error: error.map(str::to_string),
        }
    }

    /// Convert to the compact transport form
    pub fn to_compact(&self) -> CompactProof {
        CompactProof::from(self)
    }
}

/// Detailed inclusion verification outcome
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    /// Whether the proof is valid
    pub valid: bool,
    /// Leaf that was verified
    pub leaf: Digest,
    /// Root that was verified against
    pub root: Digest,
    /// Entry index
    pub index: u64,
    /// Number of sibling digests
    pub proof_length: usize,
    /// Reason for failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::Sha256Hasher;

    fn two_leaf_proof() -> InclusionProof {
        let a = Sha256Hasher::hash(b"a");
        let b = Sha256Hasher::hash(b"b");
        InclusionProof {
            leaf: a,
            index: 0,
            siblings: vec![b],
            directions: vec![Direction::Right],
            root: Sha256Hasher::hash_pair(&a, &b),
        }
    }

    #[test]
    fn test_verify_and_report() {
        let proof = two_leaf_proof();
        assert!(proof.verify::<Sha256Hasher>());
        let report = proof.report::<Sha256Hasher>();
        assert!(report.valid);
        assert_eq!(report.proof_length, 1);
        assert!(report.error.is_none());
    }

    #[test]
    fn test_length_mismatch_is_invalid() {
        let mut proof = two_leaf_proof();
        proof.directions.push(Direction::Left);
        assert!(!proof.verify::<Sha256Hasher>());
        let report = proof.report::<Sha256Hasher>();
        assert!(!report.valid);
        assert!(report.error.unwrap().contains("same length"));
    }

    #[test]
    fn test_from_json_accepts_sdk_field_name() {
        let proof = two_leaf_proof();
        let json = serde_json::json!({
            "leaf": proof.leaf,
            "index": 0,
            "proof": proof.siblings,
            "directions": ["right"],
            "root": proof.root,
        });
        let parsed = InclusionProof::from_json(&json.to_string()).unwrap();
        assert_eq!(parsed, proof);
    }

    #[test]
    fn test_from_json_missing_fields_is_malformed() {
        let err = InclusionProof::from_json(r#"{"index": 0, "siblings": []}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedProof(_)));

        let err = InclusionProof::from_json(
            r#"{"leaf": "00", "index": 0, "siblings": [], "directions": [], "root": "00"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedProof(_)));
    }

    #[test]
    fn test_direction_bits() {
        assert_eq!(Direction::Left.as_bit(), '0');
        assert_eq!(Direction::from_bit('1'), Some(Direction::Right));
        assert_eq!(Direction::from_bit('x'), None);
    }
}
