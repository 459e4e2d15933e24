//! Configuration

use std::{env, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    hasher::HashAlgorithm,
};

/// Default sparse tree depth
pub const DEFAULT_SMT_DEPTH: usize = 256;

/// Largest supported sparse tree depth (bits in a digest)
pub const MAX_SMT_DEPTH: usize = 256;

/// Engine configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Hash algorithm for new trees
    pub hash_algorithm: HashAlgorithm,
    /// Depth of the sparse Merkle tree
    pub smt_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::default(),
            smt_depth: DEFAULT_SMT_DEPTH,
        }
    }
}

impl EngineConfig {
    /// Load from environment variables
    ///
    /// - `VEILCHAIN_HASH_ALGORITHM`: `sha256`, `blake3` or `keccak256`
    /// - `VEILCHAIN_SMT_DEPTH`: `1..=256`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(algorithm) = lookup("VEILCHAIN_HASH_ALGORITHM") {
            config.hash_algorithm = algorithm.parse()?;
        }
        if let Some(depth) = lookup("VEILCHAIN_SMT_DEPTH") {
            config.smt_depth = depth.trim().parse().map_err(|_| {
                Error::Config(format!("VEILCHAIN_SMT_DEPTH={depth:?} is not a number"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = serde_json::from_slice(&fs::read(path)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.smt_depth == 0 || self.smt_depth > MAX_SMT_DEPTH {
            return Err(Error::InvalidDepth(self.smt_depth));
        }
        Ok(())
    }
}
