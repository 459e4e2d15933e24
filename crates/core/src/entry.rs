//! Ledger entries and data hashing

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    digest::Digest,
    error::Result,
    hasher::TreeHasher,
    proof::{InclusionProof, VerificationReport},
};

/// An entry as recorded in the ledger.
///
/// The leaf digest covers the position, so two entries with equal data and
/// timestamps still produce different leaves and cannot be swapped unnoticed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Zero-based position in the ledger
    pub position: u64,
    /// Application payload
    pub data: Value,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl LedgerEntry {
    /// Create an entry
    pub const fn new(position: u64, data: Value, timestamp: u64) -> Self {
        Self {
            position,
            data,
            timestamp,
        }
    }

    /// Leaf digest: hash of the entry's compact JSON encoding
    pub fn leaf_digest<H: TreeHasher>(&self) -> Result<Digest> {
        Ok(H::hash(&serde_json::to_vec(self)?))
    }
}

/// Hash application data into a leaf digest.
///
/// Strings are hashed as their UTF-8 bytes, anything else as compact JSON
/// with object keys in sorted order.
pub fn hash_data<H: TreeHasher>(data: &Value) -> Result<Digest> {
    match data {
        Value::String(s) => Ok(H::hash(s.as_bytes())),
        other => Ok(H::hash(&serde_json::to_vec(other)?)),
    }
}

/// `true` when `data` hashes to `expected`
pub fn verify_data<H: TreeHasher>(data: &Value, expected: &Digest) -> bool {
    hash_data::<H>(data).is_ok_and(|digest| digest == *expected)
}

/// Outcome of checking data against an inclusion proof
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataVerification {
    /// Whether the data hashes to the proof's leaf
    pub data_match: bool,
    /// Proof verification outcome; `valid` is false when the data mismatched
    #[serde(flatten)]
    pub report: VerificationReport,
}

impl DataVerification {
    /// Data matches and the proof is valid
    pub const fn is_verified(&self) -> bool {
        self.data_match && self.report.valid
    }
}

/// Check that `data` is the leaf of `proof` and that the proof is valid.
pub fn verify_data_with_proof<H: TreeHasher>(
    data: &Value,
    proof: &InclusionProof,
) -> DataVerification {
    if verify_data::<H>(data, &proof.leaf) {
        return DataVerification {
            data_match: true,
            report: proof.report::<H>(),
        };
    }
    DataVerification {
        data_match: false,
        report: VerificationReport {
            valid: false,
            leaf: proof.leaf,
            root: proof.root,
            index: proof.index,
            proof_length: proof.siblings.len(),
            error: Some("data hash does not match proof leaf".to_string()),
        },
    }
}
