//! `veilchain-verifier`: offline checks for VeilChain proofs.
//!
//! ```text
//! veilchain-verifier root leaves.json
//! veilchain-verifier prove --index 3 --compact leaves.json
//! veilchain-verifier verify-inclusion proof.json
//! veilchain-verifier consistency --old-size 4 --old-root <hex> leaves.json
//! veilchain-verifier verify-consistency proof.json
//! veilchain-verifier smt-prove --key alice entries.json
//! veilchain-verifier verify-smt proof.json
//! veilchain-verifier hash-data '{"vote":"yes"}'
//! ```
//!
//! Leaf files hold a JSON array of hex digests, sparse tree entry files a JSON
//! object of string keys to string values. Failed verifications exit non-zero.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use veilchain_core::{
    CompactProof, ConsistencyProof, Digest, EngineConfig, HashAlgorithm, InclusionProof,
    MerkleTree, hash_data, with_hasher,
};
use veilchain_smt::{SmtProof, SparseMerkleTree};

#[derive(Parser, Debug)]
#[command(name = "veilchain-verifier", version, about = "Offline verifier for VeilChain proofs")]
struct Cli {
    /// JSON engine config file; defaults come from `VEILCHAIN_*` variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Hash algorithm override (`sha256`, `blake3`, `keccak256`)
    #[arg(short, long, global = true)]
    algorithm: Option<HashAlgorithm>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the root and size of a leaf list
    Root {
        /// JSON array of leaf digests
        leaves: PathBuf,
    },

    /// Print the inclusion proof for one leaf
    Prove {
        /// Leaf index
        #[arg(short, long)]
        index: u64,

        /// Emit the compact encoding
        #[arg(long)]
        compact: bool,

        /// JSON array of leaf digests
        leaves: PathBuf,
    },

    /// Verify an inclusion proof (full or compact)
    VerifyInclusion {
        /// Proof file
        proof: PathBuf,
    },

    /// Prove that a leaf list extends an earlier snapshot
    Consistency {
        /// Size of the earlier snapshot
        #[arg(long)]
        old_size: u64,

        /// Root of the earlier snapshot
        #[arg(long)]
        old_root: Digest,

        /// JSON array of the current leaf digests
        leaves: PathBuf,
    },

    /// Verify a consistency proof
    VerifyConsistency {
        /// Proof file
        proof: PathBuf,
    },

    /// Print the sparse tree proof for a key
    SmtProve {
        /// Key to prove
        #[arg(short, long)]
        key: String,

        /// JSON object of key/value strings
        entries: PathBuf,
    },

    /// Verify a sparse tree proof
    VerifySmt {
        /// Proof file
        proof: PathBuf,
    },

    /// Hash application data into a leaf digest
    HashData {
        /// JSON value, or a plain string when it does not parse as JSON
        data: String,
    },
}

/// Printed text and whether the command succeeded
#[derive(Debug)]
struct Outcome {
    text: String,
    ok: bool,
}

impl Outcome {
    const fn ok(text: String) -> Self {
        Self { text, ok: true }
    }

    const fn verdict(valid: bool, text: String) -> Self {
        Self { text, ok: valid }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RootSummary {
    algorithm: HashAlgorithm,
    root: Digest,
    size: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SmtSummary<'a> {
    valid: bool,
    key: &'a str,
    included: bool,
    depth: usize,
    root: Digest,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_tracing()?;

    let config = load_config(cli.config.as_deref(), cli.algorithm)?;
    debug!(
        algorithm = %config.hash_algorithm,
        smt_depth = config.smt_depth,
        "configuration loaded"
    );

    let outcome = run(cli.command, &config)?;
    println!("{}", outcome.text);
    if outcome.ok {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("verification failed");
        Ok(ExitCode::FAILURE)
    }
}

/// Log to stderr so stdout carries only command output. `RUST_LOG` overrides
/// the `info` default.
fn setup_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load_config(path: Option<&Path>, algorithm: Option<HashAlgorithm>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::from_env().context("invalid VEILCHAIN_* environment")?,
    };
    if let Some(algorithm) = algorithm {
        config.hash_algorithm = algorithm;
    }
    Ok(config)
}

fn run(command: Command, config: &EngineConfig) -> Result<Outcome> {
    let algorithm = config.hash_algorithm;
    match command {
        Command::Root { leaves } => cmd_root(algorithm, &leaves),
        Command::Prove {
            index,
            compact,
            leaves,
        } => cmd_prove(algorithm, index, compact, &leaves),
        Command::VerifyInclusion { proof } => cmd_verify_inclusion(algorithm, &proof),
        Command::Consistency {
            old_size,
            old_root,
            leaves,
        } => cmd_consistency(algorithm, old_size, old_root, &leaves),
        Command::VerifyConsistency { proof } => cmd_verify_consistency(algorithm, &proof),
        Command::SmtProve { key, entries } => cmd_smt_prove(config, &key, &entries),
        Command::VerifySmt { proof } => cmd_verify_smt(algorithm, &proof),
        Command::HashData { data } => cmd_hash_data(algorithm, data),
    }
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    serde_json::from_str(&read_text(path)?)
        .with_context(|| format!("failed to parse {}", path.display()))
}

fn cmd_root(algorithm: HashAlgorithm, leaves: &Path) -> Result<Outcome> {
    let leaves: Vec<Digest> = read_json(leaves)?;
    let summary = with_hasher!(algorithm, H => {
        let tree = MerkleTree::<H>::from_leaves(&leaves);
        RootSummary {
            algorithm,
            root: tree.root(),
            size: tree.size(),
        }
    });
    info!(%algorithm, size = summary.size, root = %summary.root, "computed root");
    Ok(Outcome::ok(serde_json::to_string_pretty(&summary)?))
}

fn cmd_prove(
    algorithm: HashAlgorithm,
    index: u64,
    compact: bool,
    leaves: &Path,
) -> Result<Outcome> {
    let leaves: Vec<Digest> = read_json(leaves)?;
    let proof = with_hasher!(algorithm, H => {
        MerkleTree::<H>::from_leaves(&leaves).get_proof(index)
    })
    .with_context(|| format!("cannot prove leaf {index}"))?;
    let text = if compact {
        serde_json::to_string(&proof.to_compact())?
    } else {
        serde_json::to_string_pretty(&proof)?
    };
    Ok(Outcome::ok(text))
}

/// Parse a full proof, falling back to the compact encoding
fn parse_inclusion(text: &str) -> Result<InclusionProof> {
    match InclusionProof::from_json(text) {
        Ok(proof) => Ok(proof),
        Err(full) => {
            let compact = CompactProof::from_json(text)
                .with_context(|| format!("not an inclusion proof ({full}) or a compact proof"))?;
            Ok(compact.expand()?)
        }
    }
}

fn cmd_verify_inclusion(algorithm: HashAlgorithm, path: &Path) -> Result<Outcome> {
    let proof = parse_inclusion(&read_text(path)?)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let report = with_hasher!(algorithm, H => proof.report::<H>());
    info!(valid = report.valid, index = report.index, "checked inclusion proof");
    Ok(Outcome::verdict(report.valid, serde_json::to_string_pretty(&report)?))
}

fn cmd_consistency(
    algorithm: HashAlgorithm,
    old_size: u64,
    old_root: Digest,
    leaves: &Path,
) -> Result<Outcome> {
    let leaves: Vec<Digest> = read_json(leaves)?;
    let proof = with_hasher!(algorithm, H => {
        let tree = MerkleTree::<H>::from_leaves(&leaves);
        ConsistencyProof::generate(old_root, old_size, &tree)
    });
    match proof {
        Ok(proof) => Ok(Outcome::ok(serde_json::to_string_pretty(&proof)?)),
        Err(err) if err.is_tamper_evidence() => {
            warn!(old_size, %old_root, "history does not match the snapshot");
            Ok(Outcome::verdict(false, err.to_string()))
        }
        Err(err) => Err(err.into()),
    }
}

fn cmd_verify_consistency(algorithm: HashAlgorithm, path: &Path) -> Result<Outcome> {
    let proof = ConsistencyProof::from_json(&read_text(path)?)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let (valid, text) = with_hasher!(algorithm, H => (proof.verify::<H>(), proof.describe::<H>()));
    info!(valid, old_size = proof.old_size, new_size = proof.new_size, "checked consistency proof");
    Ok(Outcome::verdict(valid, text))
}

fn cmd_smt_prove(config: &EngineConfig, key: &str, entries: &Path) -> Result<Outcome> {
    let entries: BTreeMap<String, String> = read_json(entries)?;
    let proof = with_hasher!(config.hash_algorithm, H => {
        let mut smt = SparseMerkleTree::<H>::from_config(config)?;
        for (k, v) in &entries {
            smt.set(k, v)?;
        }
        smt.get_proof(key)
    });
    info!(key, included = proof.included, depth = proof.depth(), "built sparse tree proof");
    Ok(Outcome::ok(serde_json::to_string_pretty(&proof)?))
}

fn cmd_verify_smt(algorithm: HashAlgorithm, path: &Path) -> Result<Outcome> {
    let proof = SmtProof::from_json(&read_text(path)?)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let valid = with_hasher!(algorithm, H => proof.verify::<H>());
    let summary = SmtSummary {
        valid,
        key: &proof.key,
        included: proof.included,
        depth: proof.depth(),
        root: proof.root,
    };
    Ok(Outcome::verdict(valid, serde_json::to_string_pretty(&summary)?))
}

fn cmd_hash_data(algorithm: HashAlgorithm, data: String) -> Result<Outcome> {
    let value = serde_json::from_str(&data).unwrap_or_else(|_| Value::String(data));
    let digest = with_hasher!(algorithm, H => hash_data::<H>(&value))?;
    Ok(Outcome::ok(digest.to_hex()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;
    use veilchain_core::{Sha256Hasher, TreeHasher};

    use super::*;

    fn leaves(n: u8) -> Vec<Digest> {
        (0..n).map(|i| Sha256Hasher::hash(&[i])).collect()
    }

    fn json_file(value: &impl Serialize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(value).unwrap().as_bytes()).unwrap();
        file
    }

    fn text_file(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "veilchain-verifier",
            "--algorithm",
            "blake3",
            "prove",
            "--index",
            "2",
            "leaves.json",
        ])
        .unwrap();
        assert_eq!(cli.algorithm, Some(HashAlgorithm::Blake3));
        assert!(matches!(
            cli.command,
            Command::Prove {
                index: 2,
                compact: false,
                ..
            }
        ));

        assert!(Cli::try_parse_from(["veilchain-verifier", "-a", "md5", "root", "x"]).is_err());
    }

    #[test]
    fn test_root_and_prove_round_trip() {
        let file = json_file(&leaves(5));
        let outcome = cmd_root(HashAlgorithm::Sha256, file.path()).unwrap();
        assert!(outcome.ok);
        let summary: Value = serde_json::from_str(&outcome.text).unwrap();
        assert_eq!(summary["size"], 5);
        assert_eq!(summary["algorithm"], "sha256");

        for compact in [false, true] {
            let outcome = cmd_prove(HashAlgorithm::Sha256, 3, compact, file.path()).unwrap();
            let proof = text_file(&outcome.text);
            let verdict = cmd_verify_inclusion(HashAlgorithm::Sha256, proof.path()).unwrap();
            assert!(verdict.ok, "compact {compact}");
        }

        assert!(cmd_prove(HashAlgorithm::Sha256, 5, false, file.path()).is_err());
    }

    #[test]
    fn test_wrong_algorithm_fails_verification() {
        let file = json_file(&leaves(4));
        let outcome = cmd_prove(HashAlgorithm::Sha256, 1, false, file.path()).unwrap();
        let proof = text_file(&outcome.text);
        let verdict = cmd_verify_inclusion(HashAlgorithm::Keccak256, proof.path()).unwrap();
        assert!(!verdict.ok);
        assert!(verdict.text.contains("does not match"));
    }

    #[test]
    fn test_consistency_commands() {
        let all = leaves(9);
        let old_root = MerkleTree::<Sha256Hasher>::from_leaves(&all[..6]).root();
        let file = json_file(&all);

        let outcome = cmd_consistency(HashAlgorithm::Sha256, 6, old_root, file.path()).unwrap();
        assert!(outcome.ok);
        let proof = text_file(&outcome.text);
        let verdict = cmd_verify_consistency(HashAlgorithm::Sha256, proof.path()).unwrap();
        assert!(verdict.ok);
        assert!(verdict.text.contains("VALID"));

        let outcome =
            cmd_consistency(HashAlgorithm::Sha256, 6, Digest::ZERO, file.path()).unwrap();
        assert!(!outcome.ok);

        assert!(cmd_consistency(HashAlgorithm::Sha256, 10, old_root, file.path()).is_err());
    }

    #[test]
    fn test_smt_commands() {
        let entries: BTreeMap<_, _> = [("alice", "10"), ("bob", "20")].into_iter().collect();
        let file = json_file(&entries);
        let config = EngineConfig {
            smt_depth: 32,
            ..EngineConfig::default()
        };

        for key in ["alice", "carol"] {
            let outcome = cmd_smt_prove(&config, key, file.path()).unwrap();
            let proof = text_file(&outcome.text);
            let verdict = cmd_verify_smt(HashAlgorithm::Sha256, proof.path()).unwrap();
            assert!(verdict.ok, "{key}");
            let summary: Value = serde_json::from_str(&verdict.text).unwrap();
            assert_eq!(summary["included"], key == "alice");
            assert_eq!(summary["depth"], 32);
        }
    }

    #[test]
    fn test_smt_prove_rejects_colliding_keys() {
        // both keys hash to the same first byte
        let entries: BTreeMap<_, _> = [("k0", "1"), ("k179", "2")].into_iter().collect();
        let file = json_file(&entries);
        let config = EngineConfig {
            smt_depth: 8,
            ..EngineConfig::default()
        };

        let err = cmd_smt_prove(&config, "k0", file.path()).unwrap_err();
        let err = err.downcast_ref::<veilchain_core::Error>().unwrap();
        assert!(matches!(err, veilchain_core::Error::KeyCollision { .. }));
    }

    #[test]
    fn test_hash_data() {
        let outcome = cmd_hash_data(HashAlgorithm::Sha256, "hello".to_string()).unwrap();
        assert_eq!(outcome.text, Sha256Hasher::hash(b"hello").to_hex());

        let outcome =
            cmd_hash_data(HashAlgorithm::Sha256, r#"{"voter":"alice","vote":"yes"}"#.to_string())
                .unwrap();
        assert_eq!(
            outcome.text,
            Sha256Hasher::hash(br#"{"vote":"yes","voter":"alice"}"#).to_hex()
        );
    }

    #[test]
    fn test_load_config_from_file() {
        let file = text_file(r#"{"hashAlgorithm": "keccak256", "smtDepth": 64}"#);
        let config = load_config(Some(file.path()), None).unwrap();
        assert_eq!(config.hash_algorithm, HashAlgorithm::Keccak256);
        assert_eq!(config.smt_depth, 64);

        let config = load_config(Some(file.path()), Some(HashAlgorithm::Blake3)).unwrap();
        assert_eq!(config.hash_algorithm, HashAlgorithm::Blake3);

        let bad = text_file(r#"{"smtDepth": 999}"#);
        assert!(load_config(Some(bad.path()), None).is_err());
    }

    #[test]
    fn test_unreadable_proof_is_an_error() {
        let file = text_file("not json");
        assert!(cmd_verify_inclusion(HashAlgorithm::Sha256, file.path()).is_err());
        assert!(cmd_verify_consistency(HashAlgorithm::Sha256, file.path()).is_err());
        assert!(cmd_verify_smt(HashAlgorithm::Sha256, file.path()).is_err());
    }
}
