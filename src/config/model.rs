// src/config/model.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::types::HashAlgorithm;

/// Engine settings as read from `taskchain.toml`.
///
/// ```toml
/// concurrency = 4
/// flush_interval_ms = 1000
/// profile = false
/// color = true
/// tool_bin_dir = "node_modules/.bin"
/// cache_dir = ".taskchain/cache"
/// hash_algorithm = "blake3"
/// ```
///
/// Every field is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEngineConfig {
    /// Project root. Relative cache/tool paths and glob patterns resolve
    /// against it. Defaults to the current working directory.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Maximum number of shell commands running at the same time.
    /// Defaults to the number of available CPUs.
    #[serde(default)]
    pub concurrency: Option<usize>,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Print an elapsed-time line after every command.
    #[serde(default)]
    pub profile: bool,

    #[serde(default = "default_color")]
    pub color: bool,

    /// Directory prepended to `PATH` for every command, if not already there.
    #[serde(default = "default_tool_bin_dir")]
    pub tool_bin_dir: Option<PathBuf>,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
}

impl Default for RawEngineConfig {
    fn default() -> Self {
        Self {
            root: None,
            concurrency: None,
            flush_interval_ms: default_flush_interval_ms(),
            profile: false,
            color: default_color(),
            tool_bin_dir: default_tool_bin_dir(),
            cache_dir: default_cache_dir(),
            hash_algorithm: HashAlgorithm::default(),
        }
    }
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_color() -> bool {
    true
}

fn default_tool_bin_dir() -> Option<PathBuf> {
    Some(PathBuf::from("node_modules/.bin"))
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".taskchain/cache")
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Validated engine settings with every default resolved.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub root: PathBuf,
    pub concurrency: usize,
    pub flush_interval: Duration,
    pub profile: bool,
    pub color: bool,
    pub tool_bin_dir: Option<PathBuf>,
    pub cache_dir: PathBuf,
    pub hash_algorithm: HashAlgorithm,
}

impl EngineConfig {
    pub(crate) fn new_unchecked(raw: RawEngineConfig) -> Self {
        let root = raw
            .root
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        Self {
            root,
            concurrency: raw.concurrency.unwrap_or_else(default_concurrency),
            flush_interval: Duration::from_millis(raw.flush_interval_ms),
            profile: raw.profile,
            color: raw.color,
            tool_bin_dir: raw.tool_bin_dir,
            cache_dir: raw.cache_dir,
            hash_algorithm: raw.hash_algorithm,
        }
    }

    /// Same settings, rooted at `root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn with_profile(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_tool_bin_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.tool_bin_dir = dir;
        self
    }

    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// Absolute cache directory (`cache_dir` resolved against `root`).
    pub fn cache_path(&self) -> PathBuf {
        resolve(&self.root, &self.cache_dir)
    }

    /// Absolute tool binary directory, if one is configured.
    pub fn tool_bin_path(&self) -> Option<PathBuf> {
        self.tool_bin_dir.as_ref().map(|d| resolve(&self.root, d))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::new_unchecked(RawEngineConfig::default())
    }
}

fn resolve(root: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}
