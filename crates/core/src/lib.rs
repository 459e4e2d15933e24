//! VeilChain Merkle engine core
//!
//! Append-only Merkle tree with empty-digest padding, inclusion and
//! consistency proofs, and the hash primitives shared with the sparse tree in
//! `veilchain-smt`:
//! - [`MerkleTree`] stores leaves and serves [`InclusionProof`]s
//! - [`ConsistencyProof`] shows one snapshot extends another
//! - [`TreeHasher`] selects the hash algorithm per tree

pub mod compact;
pub mod config;
pub mod consistency;
pub mod digest;
pub mod entry;
pub mod error;
pub mod hasher;
pub mod proof;
pub mod tree;


pub use compact::{COMPACT_PROOF_VERSION, CompactProof};
pub use config::EngineConfig;
pub use consistency::{ConsistencyProof, size_from_signed, verify_against_tree};
pub use digest::{DIGEST_HEX_LEN, DIGEST_LEN, Digest, is_valid_digest};
pub use entry::{DataVerification, LedgerEntry, hash_data, verify_data, verify_data_with_proof};
pub use error::{Error, Result};
pub use hasher::{Blake3Hasher, HashAlgorithm, Keccak256Hasher, Sha256Hasher, TreeHasher};
pub use proof::{Direction, InclusionProof, VerificationReport};
pub use tree::{MerkleTree, TreeState, leaf_index_from_signed};
