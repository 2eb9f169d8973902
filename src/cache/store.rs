// src/cache/store.rs

//! On-disk location of persisted hash collections.
//!
//! Each collection lives in its own file:
//!
//! `<root>/.taskchain/cache/<key>.json`
//!
//! where `<key>` is derived from the script identity, the collection name
//! and the digest algorithm.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::hash::{COLLECTION_VERSION, HashCollection};
use crate::cache::ScriptIdentity;
use crate::errors::{Result, TaskchainError};
use crate::fs::FileSystem;
use crate::types::HashAlgorithm;

/// Cache file key for one collection.
pub fn cache_key(identity: &ScriptIdentity, name: &str, algorithm: HashAlgorithm) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(identity.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(name.as_bytes());
    hasher.update(&[0]);
    hasher.update(algorithm.as_str().as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            dir: dir.into(),
            fs,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Previous collection, or `None` if there is none usable.
    ///
    /// Missing, unreadable, corrupt and outdated files all count as absent.
    pub fn load(&self, key: &str) -> Option<HashCollection> {
        let path = self.path_for(key);
        if !self.fs.is_file(&path) {
            debug!(?path, "no cached collection");
            return None;
        }
        let bytes = match self.fs.read(&path) {
            Ok(b) => b,
            Err(e) => {
                warn!(?path, error = %e, "failed to read cached collection; treating as clean run");
                return None;
            }
        };
        match serde_json::from_slice::<HashCollection>(&bytes) {
            Ok(c) if c.version == COLLECTION_VERSION => Some(c),
            Ok(c) => {
                debug!(?path, version = c.version, "ignoring cached collection with other version");
                None
            }
            Err(e) => {
                warn!(?path, error = %e, "corrupt cached collection; treating as clean run");
                None
            }
        }
    }

    pub fn save(&self, key: &str, collection: &HashCollection) -> Result<()> {
        let path = self.path_for(key);
        let json = serde_json::to_vec_pretty(collection)?;
        self.fs.write(&path, &json).map_err(|e| {
            TaskchainError::Cache(format!("writing {}: {e:#}", path.display()))
        })?;
        info!(name = %collection.name, files = collection.files.len(), ?path, "stored hash collection");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::hash::FileHash;
    use crate::fs::mock::MockFileSystem;

    fn store() -> (CacheStore, MockFileSystem) {
        let fs = MockFileSystem::new();
        (CacheStore::new("/p/.taskchain/cache", Arc::new(fs.clone())), fs)
    }

    #[test]
    fn key_depends_on_every_component() {
        let id = ScriptIdentity::from_bytes(b"script");
        let base = cache_key(&id, "build", HashAlgorithm::Blake3);
        assert_eq!(base, cache_key(&id, "build", HashAlgorithm::Blake3));
        assert_ne!(base, cache_key(&id, "test", HashAlgorithm::Blake3));
        assert_ne!(base, cache_key(&id, "build", HashAlgorithm::Sha256));
        assert_ne!(
            base,
            cache_key(&ScriptIdentity::from_bytes(b"other"), "build", HashAlgorithm::Blake3)
        );
    }

    #[test]
    fn persisted_collection_loads_back() {
        let (store, _) = store();
        let mut c = HashCollection::new("build", HashAlgorithm::Sha256);
        c.files.insert(
            "src/a.rs".into(),
            FileHash {
                hash: Some("ab".into()),
                size: 2,
            },
        );
        store.save("k", &c).unwrap();
        assert_eq!(store.load("k"), Some(c));
    }

    #[test]
    fn corrupt_or_outdated_files_count_as_absent() {
        let (store, fs) = store();
        fs.add_file(store.path_for("bad"), "{not json");
        assert_eq!(store.load("bad"), None);

        let mut old = HashCollection::new("x", HashAlgorithm::Blake3);
        old.version = COLLECTION_VERSION + 1;
        store.save("old", &old).unwrap();
        assert_eq!(store.load("old"), None);

        assert_eq!(store.load("missing"), None);
    }
}
