// src/cache/mod.rs

//! Change-detection cache.
//!
//! A command asks for the [`Delta`] of a named file set; the engine keeps the
//! freshly computed collections in memory and writes them out only once the
//! top-level run succeeded, so a failed build is retried next time.

pub mod delta;
pub mod hash;
pub mod patterns;
pub mod store;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use tracing::{debug, info};

use crate::errors::Result;
use crate::fs::FileSystem;
use crate::types::HashAlgorithm;

pub use delta::{Delta, compare};
pub use hash::{FileHash, HashCollection, compute_file_hash};
pub use store::{CacheStore, cache_key};

/// Identity of the command file the collections belong to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptIdentity(String);

impl ScriptIdentity {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// Identity derived from a file's contents.
    pub fn from_file(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        let bytes = fs
            .read(path)
            .with_context(|| format!("reading command file {:?}", path))?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ScriptIdentity {
    fn default() -> Self {
        Self::from_bytes(b"")
    }
}

struct Pending {
    delta: Delta,
    current: HashCollection,
}

/// Per-engine change cache with memoized deltas.
pub struct ChangeCache {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    store: CacheStore,
    identity: ScriptIdentity,
    algorithm: HashAlgorithm,
    pending: Mutex<BTreeMap<String, Pending>>,
}

impl std::fmt::Debug for ChangeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeCache")
            .field("root", &self.root)
            .field("store", &self.store.dir())
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl ChangeCache {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        root: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        identity: ScriptIdentity,
        algorithm: HashAlgorithm,
    ) -> Self {
        Self {
            store: CacheStore::new(cache_dir, fs.clone()),
            fs,
            root: root.into(),
            identity,
            algorithm,
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Pending>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Changes of the files matched by `globs` since the last persisted
    /// collection called `name`.
    ///
    /// Blocking; the engine calls it on the blocking pool. A second call with
    /// the same name returns the first result until the cache is reset.
    pub fn delta(&self, name: &str, globs: &[String]) -> Result<Delta> {
        let key = cache_key(&self.identity, name, self.algorithm);
        let mut pending = self.lock();
        if let Some(p) = pending.get(&key) {
            debug!(name, "change cache hit");
            return Ok(p.delta.clone());
        }

        let skip = [self.store.dir().to_path_buf()];
        let files = patterns::expand(self.fs.as_ref(), &self.root, globs, &skip)?;
        let prior = self.store.load(&key);
        let current = HashCollection::compute(
            self.fs.as_ref(),
            &self.root,
            name,
            self.algorithm,
            &files,
        )?;
        let delta = compare(prior.as_ref(), &current)?;
        debug!(
            name,
            clean_run = delta.clean_run,
            added = delta.added.len(),
            removed = delta.removed.len(),
            modified = delta.modified.len(),
            "computed change delta"
        );

        pending.insert(
            key,
            Pending {
                delta: delta.clone(),
                current,
            },
        );
        Ok(delta)
    }

    /// Write every collection computed since the last reset. Returns how many
    /// were written.
    pub fn persist(&self) -> Result<usize> {
        let mut pending = self.lock();
        let mut written = 0;
        for (key, p) in pending.iter() {
            self.store.save(key, &p.current)?;
            written += 1;
        }
        pending.clear();
        if written > 0 {
            info!(written, "persisted change cache");
        }
        Ok(written)
    }

    /// Forget memoized results without writing them.
    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn cache(fs: &MockFileSystem) -> ChangeCache {
        ChangeCache::new(
            Arc::new(fs.clone()),
            "/p",
            "/p/.taskchain/cache",
            ScriptIdentity::from_bytes(b"commands"),
            HashAlgorithm::Blake3,
        )
    }

    fn pats() -> Vec<String> {
        vec!["src/**".to_string()]
    }

    #[test]
    fn results_are_memoized_until_persisted() {
        let fs = MockFileSystem::new();
        fs.add_file("/p/src/a.rs", "a");
        let cache = cache(&fs);

        let first = cache.delta("build", &pats()).unwrap();
        assert!(first.clean_run);

        fs.add_file("/p/src/b.rs", "b");
        let again = cache.delta("build", &pats()).unwrap();
        assert_eq!(first, again);
        assert_eq!(cache.pending(), 1);

        assert_eq!(cache.persist().unwrap(), 1);
        assert_eq!(cache.pending(), 0);

        let next = cache.delta("build", &pats()).unwrap();
        assert!(!next.clean_run);
        assert_eq!(next.added, vec!["src/b.rs"]);
        assert_eq!(next.unmodified, vec!["src/a.rs"]);
    }

    #[test]
    fn reset_discards_without_writing() {
        let fs = MockFileSystem::new();
        fs.add_file("/p/src/a.rs", "a");
        let cache = cache(&fs);

        cache.delta("build", &pats()).unwrap();
        cache.reset();
        assert!(cache.delta("build", &pats()).unwrap().clean_run);
    }

    #[test]
    fn size_change_is_modified_and_persisted_complete() {
        let fs = MockFileSystem::new();
        fs.add_file("/p/src/a.rs", "a");
        let cache = cache(&fs);
        cache.delta("build", &pats()).unwrap();
        cache.persist().unwrap();

        fs.add_file("/p/src/a.rs", "abc");
        let d = cache.delta("build", &pats()).unwrap();
        assert_eq!(d.modified, vec!["src/a.rs"]);
        cache.persist().unwrap();

        let d = cache.delta("build", &pats()).unwrap();
        assert!(!d.has_changes);
    }

    #[test]
    fn edit_during_run_is_seen_by_the_next_run() {
        let fs = MockFileSystem::new();
        fs.add_file("/p/src/a.rs", "v1");
        let cache = cache(&fs);
        cache.delta("build", &pats()).unwrap();
        cache.persist().unwrap();

        fs.add_file("/p/src/a.rs", "v22");
        let d = cache.delta("build", &pats()).unwrap();
        assert_eq!(d.modified, vec!["src/a.rs"]);

        // Same size as what the delta saw, different content.
        fs.add_file("/p/src/a.rs", "v33");
        cache.persist().unwrap();

        let d = cache.delta("build", &pats()).unwrap();
        assert!(d.has_changes);
        assert_eq!(d.modified, vec!["src/a.rs"]);
    }
}
