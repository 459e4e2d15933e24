//! Sparse Merkle tree for VeilChain key/value commitments
//!
//! A fixed-depth tree over a virtual space of `2^depth` leaves that stores
//! only the nodes on written paths:
//! - Path: the first `depth` bits of `hash(key)`, most significant bit first,
//!   a set bit descending to the right child
//! - Leaf: `hash(0x00 || hash(key) || hash(value))`, or `default[0] = hash("")`
//!   when unset. Binding the key hash lets a leaf have exactly one owner; a
//!   second key on the same path is rejected
//! - Empty subtree of height `h`: `default[h] = hash(default[h-1] || default[h-1])`
//!
//! These conventions are format version [`SMT_FORMAT_VERSION`]; exported state
//! records it.

mod proof;
mod tree;


pub use proof::{SmtLeaf, SmtProof};
pub use tree::{SparseMerkleTree, SparseTreeState, StoredNode};

/// Version of the path and leaf conventions
pub const SMT_FORMAT_VERSION: u8 = 2;

/// Largest supported depth (bits in a digest)
pub const MAX_DEPTH: usize = 256;
