// src/engine/mod.rs

//! Execution engine.
//!
//! - [`node`] resolves user input into the closed [`Node`] tree.
//! - [`context`] holds per-chain scheduling state and forks it.
//! - [`scheduler`] walks the tree: sequences, parallel fan-out and
//!   sub-command recursion.
//! - [`registry`] maps command names to argument schemas and run routines.
//! - [`runtime`] is the public facade: [`Engine`], [`Scope`] and
//!   [`Continuation`].

pub mod context;
pub mod node;
pub mod registry;
pub mod runtime;
pub mod scheduler;

pub use context::ExecContext;
pub use node::{Node, RawNode, SubCommandRef};
pub use registry::{
    ArgKind, ArgSchema, ArgSpec, Args, CommandHandler, CommandRegistry, Registry, Validated,
};
pub use runtime::{Continuation, Engine, EngineBuilder, Scope};
