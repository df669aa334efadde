//! Merkle commitments over analysis results.
//!
//! Leaf order is a compatibility contract: `[url, spaceSaved,
//! optimizations.len(), JSON(domStats), JSON(performance)]`. Reordering it
//! changes every root ever produced.

use crate::error::{HarvestError, Result};
use harvester_scanner::AnalysisResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

/// Root reported when no commitment could be built. Never a valid proof.
pub const ZERO_ROOT: &str = "0000000000000000000000000000000000000000000000000000000000000000";

type Hash = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// Sibling hash on the path from a leaf to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub position: Side,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleCommitment {
    pub root: String,
    /// Inclusion proof for `leaves[0]`, the URL.
    pub proof: Vec<ProofStep>,
    pub leaves: Vec<String>,
}

impl MerkleCommitment {
    pub fn unavailable() -> Self {
        Self {
            root: ZERO_ROOT.to_string(),
            proof: Vec::new(),
            leaves: Vec::new(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.root != ZERO_ROOT
    }

    pub fn verify_url_leaf(&self) -> bool {
        match self.leaves.first() {
            Some(leaf) => verify(&self.root, &self.proof, leaf),
            None => false,
        }
    }
}

fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Binary SHA-256 tree. An unpaired node is carried up unchanged.
pub struct MerkleTree {
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    pub fn from_leaves<S: AsRef<[u8]>>(leaves: &[S]) -> Result<Self> {
        if leaves.is_empty() {
            return Err(HarvestError::Proof("cannot build a tree without leaves".to_string()));
        }

        let mut levels = vec![leaves.iter().map(|l| sha256(l.as_ref())).collect::<Vec<_>>()];
        while let Some(level) = levels.last()
            && level.len() > 1
        {
            let next = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [single] => *single,
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            levels.push(next);
        }

        Ok(Self { levels })
    }

    pub fn root(&self) -> String {
        self.levels
            .last()
            .and_then(|level| level.first())
            .map(hex::encode)
            .unwrap_or_else(|| ZERO_ROOT.to_string())
    }

    pub fn proof(&self, leaf_index: usize) -> Result<Vec<ProofStep>> {
        let leaf_count = self.levels.first().map(Vec::len).unwrap_or(0);
        if leaf_index >= leaf_count {
            return Err(HarvestError::Proof(format!(
                "leaf {} out of range ({} leaves)",
                leaf_index, leaf_count
            )));
        }

        let mut steps = Vec::new();
        let mut index = leaf_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = if index % 2 == 0 {
                level.get(index + 1).map(|h| (Side::Right, h))
            } else {
                level.get(index - 1).map(|h| (Side::Left, h))
            };
            if let Some((position, hash)) = sibling {
                steps.push(ProofStep {
                    position,
                    hash: hex::encode(hash),
                });
            }
            index /= 2;
        }
        Ok(steps)
    }
}

/// Checks that `leaf` hashes up to `root` along `proof`.
pub fn verify(root: &str, proof: &[ProofStep], leaf: &str) -> bool {
    if root == ZERO_ROOT {
        return false;
    }
    let mut current = sha256(leaf.as_bytes());
    for step in proof {
        let Ok(bytes) = hex::decode(&step.hash) else {
            return false;
        };
        let Ok(sibling) = <Hash>::try_from(bytes.as_slice()) else {
            return false;
        };
        current = match step.position {
            Side::Left => hash_pair(&sibling, &current),
            Side::Right => hash_pair(&current, &sibling),
        };
    }
    hex::encode(current) == root.to_ascii_lowercase()
}

pub fn leaves_for(url: &str, analysis: &AnalysisResult) -> Result<Vec<String>> {
    Ok(vec![
        url.to_string(),
        analysis.space_saved.to_string(),
        analysis.optimizations.len().to_string(),
        serde_json::to_string(&analysis.dom_stats)?,
        serde_json::to_string(&analysis.performance)?,
    ])
}

fn try_build(url: &str, analysis: &AnalysisResult) -> Result<MerkleCommitment> {
    let leaves = leaves_for(url, analysis)?;
    let tree = MerkleTree::from_leaves(&leaves)?;
    Ok(MerkleCommitment {
        root: tree.root(),
        proof: tree.proof(0)?,
        leaves,
    })
}

/// Commits to `analysis` for `url`. Falls back to [`ZERO_ROOT`] with empty
/// proof and leaves if anything goes wrong.
pub fn build_commitment(url: &str, analysis: &AnalysisResult) -> MerkleCommitment {
    match try_build(url, analysis) {
        Ok(commitment) => commitment,
        Err(e) => {
            warn!("Commitment unavailable for {}: {}", url, e);
            MerkleCommitment::unavailable()
        }
    }
}

/// `sha256(url + "-" + spaceSaved)`, hex-encoded.
pub fn generate_crawl_id(url: &str, analysis: &AnalysisResult) -> String {
    hex::encode(sha256(format!("{}-{}", url, analysis.space_saved).as_bytes()))
}
