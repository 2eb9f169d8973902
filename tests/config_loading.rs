mod common;
use crate::common::{TestResult, init_tracing};

use std::fs;
use std::time::Duration;

use tempfile::tempdir;

use taskchain::config::{DEFAULT_CONFIG_FILE, EngineConfig, load_and_validate, load_from_path};
use taskchain::{HashAlgorithm, TaskchainError};

#[test]
fn toml_file_is_loaded_and_validated() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join(DEFAULT_CONFIG_FILE);
    fs::write(
        &path,
        r#"
root = "/srv/project"
concurrency = 3
flush_interval_ms = 250
profile = true
color = false
tool_bin_dir = "tools/bin"
cache_dir = "build/cache"
hash_algorithm = "sha256"
"#,
    )?;

    let raw = load_from_path(&path)?;
    let cfg = EngineConfig::try_from(raw)?;
    assert_eq!(cfg.concurrency, 3);
    assert_eq!(cfg.flush_interval, Duration::from_millis(250));
    assert!(cfg.profile);
    assert!(!cfg.color);
    assert_eq!(cfg.hash_algorithm, HashAlgorithm::Sha256);
    assert_eq!(cfg.root, std::path::PathBuf::from("/srv/project"));
    assert_eq!(cfg.cache_path(), cfg.root.join("build/cache"));
    assert_eq!(cfg.tool_bin_path(), Some(cfg.root.join("tools/bin")));
    Ok(())
}

#[test]
fn missing_file_means_defaults() -> TestResult {
    let dir = tempdir()?;
    let cfg = load_and_validate(dir.path().join("absent.toml"))?;
    assert!(cfg.concurrency >= 1);
    assert_eq!(cfg.cache_dir, std::path::PathBuf::from(".taskchain/cache"));
    assert_eq!(cfg.tool_bin_dir, Some(std::path::PathBuf::from("node_modules/.bin")));
    Ok(())
}

#[test]
fn invalid_values_are_configuration_errors() -> TestResult {
    let dir = tempdir()?;

    let zero = dir.path().join("zero.toml");
    fs::write(&zero, "concurrency = 0\n")?;
    let err = EngineConfig::try_from(load_from_path(&zero)?).unwrap_err();
    assert!(matches!(err, TaskchainError::Config { .. }));

    let unknown = dir.path().join("unknown.toml");
    fs::write(&unknown, "parallelism = 2\n")?;
    assert!(matches!(load_from_path(&unknown), Err(TaskchainError::TomlError(_))));
    Ok(())
}
