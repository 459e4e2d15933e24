//! Hash strategies for the trees
//!
//! Every tree is parameterized by a [`TreeHasher`]. The algorithm is part of a
//! tree's type rather than process-wide state, so two trees using different
//! algorithms can live side by side and a proof can only be checked with the
//! hasher it was produced for.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tiny_keccak::{Hasher as _, Keccak};

use crate::{digest::Digest, error::Error};

/// Names a supported hash algorithm.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256
    #[default]
    Sha256,
    /// BLAKE3 with 32-byte output
    Blake3,
    /// Keccak-256 (pre-standard SHA-3 padding)
    Keccak256,
}

impl HashAlgorithm {
    /// Returns the string representation of the algorithm
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
            Self::Keccak256 => "keccak256",
        }
    }

    /// Digest of the empty byte string under this algorithm
    pub fn empty_digest(&self) -> Digest {
        match self {
            Self::Sha256 => Sha256Hasher::empty_digest(),
            Self::Blake3 => Blake3Hasher::empty_digest(),
            Self::Keccak256 => Keccak256Hasher::empty_digest(),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            "keccak256" | "keccak-256" | "keccak" => Ok(Self::Keccak256),
            other => Err(Error::Config(format!("unknown hash algorithm {other:?}"))),
        }
    }
}

/// Hash strategy used by the append-only tree, the sparse tree and the
/// consistency engine.
///
/// `hash_pair` must be `hash(left || right)`: order sensitive, no prefix.
pub trait TreeHasher: fmt::Debug + Clone + Copy + Default + Send + Sync + 'static {
    /// Algorithm tag recorded in exported state
    const ALGORITHM: HashAlgorithm;

    /// Hash arbitrary bytes
    fn hash(data: &[u8]) -> Digest;

    /// Hash two digests together, `left` first
    fn hash_pair(left: &Digest, right: &Digest) -> Digest;

    /// Digest of the empty byte string, used as padding and as the empty root
    fn empty_digest() -> Digest {
        Self::hash(&[])
    }
}

/// SHA-256 hasher (the default)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sha256Hasher;

impl TreeHasher for Sha256Hasher {
    const ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

    fn hash(data: &[u8]) -> Digest {
        Digest::from_bytes(Sha256::digest(data).into())
    }

    fn hash_pair(left: &Digest, right: &Digest) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(left.as_bytes());
        hasher.update(right.as_bytes());
        Digest::from_bytes(hasher.finalize().into())
    }
}

/// BLAKE3 hasher
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Blake3Hasher;

impl TreeHasher for Blake3Hasher {
    const ALGORITHM: HashAlgorithm = HashAlgorithm::Blake3;

    fn hash(data: &[u8]) -> Digest {
        Digest::from_bytes(blake3::hash(data).into())
    }

    fn hash_pair(left: &Digest, right: &Digest) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(left.as_bytes());
        hasher.update(right.as_bytes());
        Digest::from_bytes(hasher.finalize().into())
    }
}

/// Keccak256 hasher
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Keccak256Hasher;

impl TreeHasher for Keccak256Hasher {
    const ALGORITHM: HashAlgorithm = HashAlgorithm::Keccak256;

    fn hash(data: &[u8]) -> Digest {
        let mut hasher = Keccak::v256();
        hasher.update(data);
        let mut output = [0u8; 32];
        hasher.finalize(&mut output);
        Digest::from_bytes(output)
    }

    fn hash_pair(left: &Digest, right: &Digest) -> Digest {
        let mut hasher = Keccak::v256();
        hasher.update(left.as_bytes());
        hasher.update(right.as_bytes());
        let mut output = [0u8; 32];
        hasher.finalize(&mut output);
        Digest::from_bytes(output)
    }
}

/// Evaluate an expression with a type alias bound to the hasher named by a
/// runtime [`HashAlgorithm`].
///
/// ```
/// use veilchain_core::{with_hasher, HashAlgorithm, TreeHasher};
///
/// let algorithm: HashAlgorithm = "blake3".parse().unwrap();
/// let empty = with_hasher!(algorithm, H => H::empty_digest());
/// assert_eq!(empty, algorithm.empty_digest());
/// ```
#[macro_export]
macro_rules! with_hasher {
    ($algorithm:expr, $hasher:ident => $body:expr) => {
        match $algorithm {
            $crate::HashAlgorithm::Sha256 => {
                type $hasher = $crate::Sha256Hasher;
                $body
            }
            $crate::HashAlgorithm::Blake3 => {
                type $hasher = $crate::Blake3Hasher;
                $body
            }
            $crate::HashAlgorithm::Keccak256 => {
                type $hasher = $crate::Keccak256Hasher;
                $body
            }
        }
    };
}
