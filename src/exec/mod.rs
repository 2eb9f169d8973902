// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`task_runner`] spawns one shell command and classifies its outcome.
//! - [`state_capture`] recovers the command's final cwd and environment.
//! - [`output`] multiplexes concurrent output into prefixed lines.
//! - [`limiter`] bounds how many commands run at once.

pub mod limiter;
pub mod output;
pub mod state_capture;
pub mod task_runner;

pub use limiter::Limiter;
pub use output::{CaptureBuffer, OutputChannel, OutputMux};
pub use state_capture::{CapturedState, StateFiles};
