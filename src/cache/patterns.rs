// src/cache/patterns.rs

//! Glob expansion relative to the project root.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};

use crate::fs::FileSystem;

/// Directories never descended into.
const ALWAYS_SKIPPED: [&str; 1] = [".git"];

/// One compiled pattern. `!pattern` removes what earlier patterns added.
#[derive(Debug, Clone)]
struct Rule {
    negated: bool,
    matcher: GlobMatcher,
}

fn compile(pattern: &str) -> Result<Rule> {
    let (negated, glob) = match pattern.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };
    let glob = glob.trim_start_matches("./");
    let matcher = GlobBuilder::new(glob)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid glob pattern: {pattern}"))?
        .compile_matcher();
    Ok(Rule { negated, matcher })
}

/// Expand `patterns` over every file under `root`.
///
/// Patterns apply in order. Returns sorted, deduplicated `/`-separated paths
/// relative to `root`. Directories in `skip` (absolute, or relative to
/// `root`) are not walked.
pub fn expand(
    fs: &dyn FileSystem,
    root: &Path,
    patterns: &[String],
    skip: &[PathBuf],
) -> Result<Vec<String>> {
    let rules = patterns
        .iter()
        .map(|p| compile(p))
        .collect::<Result<Vec<_>>>()?;
    if rules.is_empty() {
        return Ok(Vec::new());
    }

    let skip: Vec<PathBuf> = skip
        .iter()
        .map(|p| if p.is_absolute() { p.clone() } else { root.join(p) })
        .collect();

    let files = walk(fs, root, &skip)?;
    let mut selected = BTreeSet::new();
    for rule in &rules {
        for rel in &files {
            if !rule.matcher.is_match(rel) {
                continue;
            }
            if rule.negated {
                selected.remove(rel);
            } else {
                selected.insert(rel.clone());
            }
        }
    }
    Ok(selected.into_iter().collect())
}

fn walk(fs: &dyn FileSystem, root: &Path, skip: &[PathBuf]) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for path in fs.read_dir(&dir)? {
            if fs.is_dir(&path) {
                let hidden = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| ALWAYS_SKIPPED.contains(&n));
                if !hidden && !skip.iter().any(|s| s == &path) {
                    stack.push(path);
                }
            } else if fs.is_file(&path) {
                if let Some(rel) = relative_str(root, &path) {
                    files.push(rel);
                }
            }
        }
    }
    Ok(files)
}

/// `path` relative to `root`, with forward slashes.
fn relative_str(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn project() -> MockFileSystem {
        let fs = MockFileSystem::new();
        fs.add_file("/p/src/main.rs", "");
        fs.add_file("/p/src/lib.rs", "");
        fs.add_file("/p/src/gen/out.rs", "");
        fs.add_file("/p/README.md", "");
        fs.add_file("/p/.git/HEAD", "");
        fs.add_file("/p/.taskchain/cache/x.json", "");
        fs
    }

    fn pats(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn star_does_not_cross_directories() {
        let fs = project();
        let got = expand(&fs, Path::new("/p"), &pats(&["src/*.rs"]), &[]).unwrap();
        assert_eq!(got, vec!["src/lib.rs", "src/main.rs"]);
    }

    #[test]
    fn negation_removes_earlier_matches_and_output_is_sorted() {
        let fs = project();
        let got = expand(
            &fs,
            Path::new("/p"),
            &pats(&["**/*.rs", "README.md", "!src/gen/**", "src/main.rs"]),
            &[],
        )
        .unwrap();
        assert_eq!(got, vec!["README.md", "src/lib.rs", "src/main.rs"]);
    }

    #[test]
    fn skipped_directories_are_not_walked() {
        let fs = project();
        let got = expand(
            &fs,
            Path::new("/p"),
            &pats(&["**/*"]),
            &[PathBuf::from(".taskchain/cache")],
        )
        .unwrap();
        assert!(!got.iter().any(|p| p.starts_with(".taskchain")));
        assert!(!got.iter().any(|p| p.starts_with(".git")));
        assert!(got.contains(&"README.md".to_string()));
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let fs = project();
        assert!(expand(&fs, Path::new("/p"), &pats(&["src/[.rs"]), &[]).is_err());
    }
}
