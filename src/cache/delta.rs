// src/cache/delta.rs

use serde::Serialize;

use crate::cache::hash::HashCollection;
use crate::errors::{Result, TaskchainError};

/// Difference between the previous and the current state of a file set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Delta {
    pub has_changes: bool,
    /// No previous collection existed.
    pub clean_run: bool,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
    pub unmodified: Vec<String>,
}

/// Classify `current` against `prior`.
///
/// All lists come out sorted (collections are keyed by path).
pub fn compare(prior: Option<&HashCollection>, current: &HashCollection) -> Result<Delta> {
    let Some(prior) = prior else {
        return Ok(Delta {
            has_changes: true,
            clean_run: true,
            added: current.files.keys().cloned().collect(),
            ..Delta::default()
        });
    };

    if prior.algorithm != current.algorithm {
        return Err(TaskchainError::AlgorithmMismatch {
            left: prior.algorithm,
            right: current.algorithm,
        });
    }

    let mut delta = Delta::default();
    for (path, now) in &current.files {
        match prior.files.get(path) {
            None => delta.added.push(path.clone()),
            Some(before) => {
                let same = before.size == now.size
                    && before.hash.is_some()
                    && before.hash == now.hash;
                if same {
                    delta.unmodified.push(path.clone());
                } else {
                    delta.modified.push(path.clone());
                }
            }
        }
    }
    delta.removed = prior
        .files
        .keys()
        .filter(|p| !current.files.contains_key(*p))
        .cloned()
        .collect();

    delta.has_changes =
        !(delta.added.is_empty() && delta.removed.is_empty() && delta.modified.is_empty());
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::hash::FileHash;
    use crate::types::HashAlgorithm;

    fn collection(algorithm: HashAlgorithm, files: &[(&str, Option<&str>, u64)]) -> HashCollection {
        let mut c = HashCollection::new("t", algorithm);
        for (path, hash, size) in files {
            c.files.insert(
                path.to_string(),
                FileHash {
                    hash: hash.map(str::to_string),
                    size: *size,
                },
            );
        }
        c
    }

    #[test]
    fn no_prior_is_a_clean_run() {
        let current = collection(HashAlgorithm::Blake3, &[("a", Some("1"), 1)]);
        let d = compare(None, &current).unwrap();
        assert!(d.clean_run);
        assert!(d.has_changes);
        assert_eq!(d.added, vec!["a"]);
    }

    #[test]
    fn classifies_every_path() {
        let prior = collection(
            HashAlgorithm::Blake3,
            &[("same", Some("x"), 1), ("edit", Some("x"), 1), ("gone", Some("x"), 1)],
        );
        let current = collection(
            HashAlgorithm::Blake3,
            &[("same", Some("x"), 1), ("edit", None, 2), ("new", Some("y"), 1)],
        );
        let d = compare(Some(&prior), &current).unwrap();
        assert!(!d.clean_run);
        assert!(d.has_changes);
        assert_eq!(d.unmodified, vec!["same"]);
        assert_eq!(d.modified, vec!["edit"]);
        assert_eq!(d.removed, vec!["gone"]);
        assert_eq!(d.added, vec!["new"]);
    }

    #[test]
    fn identical_collections_have_no_changes() {
        let files = [("a", Some("1"), 3), ("b", Some("2"), 4)];
        let prior = collection(HashAlgorithm::Sha256, &files);
        let current = collection(HashAlgorithm::Sha256, &files);
        let d = compare(Some(&prior), &current).unwrap();
        assert!(!d.has_changes);
        assert_eq!(d.unmodified, vec!["a", "b"]);
    }

    #[test]
    fn mixed_algorithms_are_rejected() {
        let prior = collection(HashAlgorithm::Sha256, &[]);
        let current = collection(HashAlgorithm::Blake3, &[]);
        assert!(matches!(
            compare(Some(&prior), &current),
            Err(TaskchainError::AlgorithmMismatch { .. })
        ));
    }
}
