// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{EngineConfig, RawEngineConfig};
use crate::errors::{Result, TaskchainError};
use crate::types::HashAlgorithm;

/// File name looked up by embedding applications that want a project-local
/// engine config.
pub const DEFAULT_CONFIG_FILE: &str = "taskchain.toml";

/// Load engine settings from a TOML file and return the raw
/// `RawEngineConfig`.
///
/// This only performs TOML deserialization; it does **not** validate. Use
/// [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawEngineConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawEngineConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Load engine settings, apply `TASKCHAIN_*` environment overrides and
/// validate the result.
///
/// A missing file is not an error: defaults are used.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<EngineConfig> {
    let path = path.as_ref();
    let raw = if path.exists() {
        load_from_path(path)?
    } else {
        tracing::debug!(path = %path.display(), "no engine config file; using defaults");
        RawEngineConfig::default()
    };
    let raw = apply_env_overrides(raw, |key| std::env::var(key).ok())?;
    EngineConfig::try_from(raw)
}

/// Overlay environment-variable settings on top of a raw config.
///
/// `lookup` is injected so tests don't have to touch the process
/// environment.
pub fn apply_env_overrides<F>(mut raw: RawEngineConfig, lookup: F) -> Result<RawEngineConfig>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("TASKCHAIN_CONCURRENCY") {
        let n = v.trim().parse::<usize>().map_err(|_| {
            TaskchainError::config("", format!("TASKCHAIN_CONCURRENCY must be an integer (got {v:?})"))
        })?;
        raw.concurrency = Some(n);
    }
    if let Some(v) = lookup("TASKCHAIN_FLUSH_MS") {
        raw.flush_interval_ms = v.trim().parse::<u64>().map_err(|_| {
            TaskchainError::config("", format!("TASKCHAIN_FLUSH_MS must be an integer (got {v:?})"))
        })?;
    }
    if let Some(v) = lookup("TASKCHAIN_PROFILE") {
        raw.profile = parse_flag("TASKCHAIN_PROFILE", &v)?;
    }
    if let Some(v) = lookup("TASKCHAIN_COLOR") {
        raw.color = parse_flag("TASKCHAIN_COLOR", &v)?;
    }
    if let Some(v) = lookup("TASKCHAIN_HASH") {
        raw.hash_algorithm = v
            .parse::<HashAlgorithm>()
            .map_err(|e| TaskchainError::config("", e))?;
    }
    Ok(raw)
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(TaskchainError::config(
            "",
            format!("{key} must be a boolean (got {other:?})"),
        )),
    }
}
