// src/cache/hash.rs

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::fs::FileSystem;
use crate::types::HashAlgorithm;

/// Format version written into every persisted collection. Files with a
/// different version are treated as absent.
pub const COLLECTION_VERSION: u32 = 1;

/// Compute the digest of a single file as lowercase hex.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path, algorithm: HashAlgorithm) -> Result<String> {
    let mut file = fs
        .open_read(path)
        .with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];

    match algorithm {
        HashAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hasher.finalize().to_hex().to_string())
        }
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
    }
}

/// Size and (optionally) digest of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHash {
    /// `None` never matches, so such an entry always reads as modified.
    pub hash: Option<String>,
    pub size: u64,
}

/// Named snapshot of file hashes, keyed by `/`-separated path relative to
/// the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashCollection {
    pub version: u32,
    pub name: String,
    pub algorithm: HashAlgorithm,
    pub files: BTreeMap<String, FileHash>,
}

impl HashCollection {
    pub fn new(name: impl Into<String>, algorithm: HashAlgorithm) -> Self {
        Self {
            version: COLLECTION_VERSION,
            name: name.into(),
            algorithm,
            files: BTreeMap::new(),
        }
    }

    /// Size and digest of each of `files` (relative to `root`), read now.
    pub fn compute(
        fs: &dyn FileSystem,
        root: &Path,
        name: &str,
        algorithm: HashAlgorithm,
        files: &[String],
    ) -> Result<Self> {
        let mut collection = Self::new(name, algorithm);
        for rel in files {
            let path = root.join(rel);
            let size = fs.file_size(&path)?;
            let hash = compute_file_hash(fs, &path, algorithm)?;
            collection.files.insert(rel.clone(), FileHash { hash: Some(hash), size });
        }
        debug!(name, files = collection.files.len(), %algorithm, "computed hash collection");
        Ok(collection)
    }
}
