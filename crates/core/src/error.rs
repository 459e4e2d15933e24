//! Error types
//!
//! Request errors (caller misuse) are returned as [`Error`]. Verification of a
//! well-formed proof never errors; it resolves to `false`.

use thiserror::Error;

use crate::{digest::Digest, hasher::HashAlgorithm};

/// Result type for tree operations
pub type Result<T> = std::result::Result<T, Error>;

/// Tree engine errors
#[derive(Debug, Error)]
pub enum Error {
    /// Leaf index outside `[0, size)`
    #[error("leaf index {index} is out of range for a tree of {size} leaves")]
    OutOfRange {
        /// Requested index (signed so that negative requests can be reported)
        index: i128,
        /// Current tree size
        size: u64,
    },

    /// Proof requested from a tree without leaves
    #[error("tree has no leaves")]
    EmptyTree,

    /// Negative tree size
    #[error("invalid tree size {0}")]
    InvalidSize(i64),

    /// Consistency proof requested for a size larger than the tree
    #[error("old size {old_size} exceeds current tree size {tree_size}")]
    SizeExceedsTree {
        /// Requested old size
        old_size: u64,
        /// Current tree size
        tree_size: u64,
    },

    /// The history before `old_size` does not hash to the claimed root.
    #[error(
        "tree was modified, not just appended: first {old_size} leaves hash to {actual}, claimed {expected}"
    )]
    ChainModified {
        /// Size of the historical snapshot
        old_size: u64,
        /// Root the caller claimed for that snapshot
        expected: Digest,
        /// Root recomputed from the current leaves
        actual: Digest,
    },

    /// Sparse tree depth outside `1..=256`
    #[error("sparse tree depth {0} is outside 1..=256")]
    InvalidDepth(usize),

    /// Key addresses a sparse tree leaf already owned by a different key
    #[error("key {key:?} collides with key hash {occupant} at its leaf")]
    KeyCollision {
        /// Key being written
        key: String,
        /// `hash(key)` of the key that owns the leaf
        occupant: Digest,
    },

    /// Not a 64 character hex string
    #[error("invalid digest {0:?}: expected 64 hex characters")]
    InvalidDigest(String),

    /// Proof record is missing fields or has an unusable shape
    #[error("malformed proof: {0}")]
    MalformedProof(String),

    /// Exported state was produced with a different hash algorithm
    #[error("state was exported with {found}, tree uses {expected}")]
    AlgorithmMismatch {
        /// Algorithm of the importing tree
        expected: HashAlgorithm,
        /// Algorithm recorded in the state
        found: HashAlgorithm,
    },

    /// Exported state failed integrity checks
    #[error("corrupt tree state: {0}")]
    CorruptState(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON encoding or decoding failed
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// I/O failure while reading configuration
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// `true` for errors that mean recorded history was rewritten.
    ///
    /// Callers should treat these as security events rather than bad input.
    pub const fn is_tamper_evidence(&self) -> bool {
        matches!(self, Self::ChainModified { .. })
    }

    /// `true` for errors caused by the caller's request rather than stored data
    pub const fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::OutOfRange { .. }
                | Self::EmptyTree
                | Self::InvalidSize(_)
                | Self::SizeExceedsTree { .. }
                | Self::InvalidDepth(_)
                | Self::KeyCollision { .. }
                | Self::InvalidDigest(_)
                | Self::MalformedProof(_)
        )
    }
}
