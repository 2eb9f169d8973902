// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::types::HashAlgorithm;

#[derive(Error, Debug)]
pub enum TaskchainError {
    /// Unknown sub-command, bad arguments, malformed node, bad options.
    #[error("{context}Configuration error: {message}")]
    Config { context: String, message: String },

    /// The shell itself could not be started.
    #[error("{context}Failed to spawn shell for `{command}`: {source}")]
    Spawn {
        context: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}Command `{command}` exited with code {code}")]
    CommandFailed {
        context: String,
        command: String,
        code: i32,
    },

    #[error("{context}Command `{command}` was terminated by {signal}")]
    CommandSignaled {
        context: String,
        command: String,
        signal: String,
    },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cannot compare hash collections built with {left} and {right}")]
    AlgorithmMismatch {
        left: HashAlgorithm,
        right: HashAlgorithm,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskchainError {
    /// Build a configuration error attributed to the given context prefix.
    pub fn config(context: impl Into<String>, message: impl Into<String>) -> Self {
        TaskchainError::Config {
            context: context.into(),
            message: message.into(),
        }
    }

    /// True for failures that were already written to the output stream by
    /// the subprocess runner.
    pub fn is_reported(&self) -> bool {
        matches!(
            self,
            TaskchainError::CommandFailed { .. }
                | TaskchainError::CommandSignaled { .. }
                | TaskchainError::Spawn { .. }
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskchainError>;
