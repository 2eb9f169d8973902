// src/lib.rs

//! Task-runner execution engine.
//!
//! Commands are registered with a [`Registry`] and run through an
//! [`Engine`]. A command's run routine receives a [`Scope`] and describes
//! its work as nested nodes: shell strings, `@name` sub-command references
//! and lists, where each level of list nesting flips between parallel and
//! sequential execution.

pub mod cache;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod shell;
pub mod types;

pub use cache::{Delta, ScriptIdentity};
pub use config::EngineConfig;
pub use engine::{
    ArgKind, ArgSchema, ArgSpec, Args, Continuation, Engine, RawNode, Registry, Scope,
};
pub use errors::{Result, TaskchainError};
pub use types::{HashAlgorithm, Verbosity};
