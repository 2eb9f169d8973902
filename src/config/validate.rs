// src/config/validate.rs

use crate::config::model::{EngineConfig, RawEngineConfig};
use crate::errors::{Result, TaskchainError};

impl TryFrom<RawEngineConfig> for EngineConfig {
    type Error = TaskchainError;

    fn try_from(raw: RawEngineConfig) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(EngineConfig::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawEngineConfig) -> Result<()> {
    if cfg.concurrency == Some(0) {
        return Err(TaskchainError::config(
            "",
            "concurrency must be >= 1 (got 0)",
        ));
    }

    if cfg.flush_interval_ms == 0 {
        return Err(TaskchainError::config(
            "",
            "flush_interval_ms must be >= 1 (got 0)",
        ));
    }

    if cfg.cache_dir.as_os_str().is_empty() {
        return Err(TaskchainError::config("", "cache_dir must not be empty"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_concurrency_is_rejected() {
        let raw: RawEngineConfig = toml::from_str("concurrency = 0").unwrap();
        let err = EngineConfig::try_from(raw).unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn defaults_validate() {
        let cfg = EngineConfig::try_from(RawEngineConfig::default()).unwrap();
        assert!(cfg.concurrency >= 1);
        assert_eq!(cfg.flush_interval.as_millis(), 1000);
        assert!(cfg.cache_path().ends_with(".taskchain/cache"));
    }
}
