// src/engine/context.rs

//! Execution context: the unit of scheduling state.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::engine::runtime::Shared;
use crate::exec::output::OutputChannel;
use crate::exec::state_capture::CapturedState;

/// Variables the shell manages itself; never carried between steps.
const SHELL_MANAGED_VARS: [&str; 2] = ["_", "SHLVL"];

/// Scheduling state for one chain of steps.
///
/// A context is owned by exactly one scheduling frame. The only ways to get a
/// new one are [`fork_branch`](Self::fork_branch),
/// [`fork_fresh`](Self::fork_fresh) and [`child`](Self::child), all of which
/// take a snapshot of the working directory and environment; the type is
/// deliberately not `Clone`. In-place mutation happens through
/// [`commit`](Self::commit), called by the subprocess runner for the chain
/// that owns the context.
pub struct ExecContext {
    shared: Arc<Shared>,
    ids: Vec<String>,
    /// Per-parent sequence number handed out by the creating context.
    id: u64,
    /// Palette index; siblings get consecutive colors.
    color: u64,
    /// Parallel branches show their id in the prefix.
    branch: bool,
    sequential: bool,
    cwd: Option<PathBuf>,
    env: Option<BTreeMap<String, String>>,
    next_id: u64,
    output: OutputChannel,
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("label", &self.label())
            .field("sequential", &self.sequential)
            .field("cwd", &self.cwd)
            .finish_non_exhaustive()
    }
}

impl ExecContext {
    /// Root context of a run: no identifiers, sequential mode, ambient
    /// cwd/env.
    pub(crate) fn root(shared: Arc<Shared>) -> Self {
        Self::build(shared, Vec::new(), (0, 0), false, true, None, None)
    }

    fn build(
        shared: Arc<Shared>,
        ids: Vec<String>,
        (id, color): (u64, u64),
        branch: bool,
        sequential: bool,
        cwd: Option<PathBuf>,
        env: Option<BTreeMap<String, String>>,
    ) -> Self {
        let label = render_label(&ids, branch.then_some(id));
        let output = shared.mux.channel(&label, color);
        Self {
            shared,
            ids,
            id,
            color,
            branch,
            sequential,
            cwd,
            env,
            next_id: 0,
            output,
        }
    }

    fn issue_id(&mut self) -> (u64, u64) {
        self.next_id += 1;
        (self.next_id, self.color.wrapping_add(self.next_id))
    }

    /// Snapshot for one element of a parallel fan-out: same identifiers, new
    /// branch id and color, parallel mode.
    pub fn fork_branch(&mut self) -> ExecContext {
        let id = self.issue_id();
        debug!(parent = %self.label(), branch = id.0, "forking parallel branch");
        Self::build(
            self.shared.clone(),
            self.ids.clone(),
            id,
            true,
            false,
            self.cwd.clone(),
            self.env.clone(),
        )
    }

    /// Snapshot for a new top-level `exec` call from the same frame: same
    /// identifiers, mode and color, fresh id.
    pub fn fork_fresh(&mut self) -> ExecContext {
        let (id, _) = self.issue_id();
        Self::build(
            self.shared.clone(),
            self.ids.clone(),
            (id, self.color),
            self.branch,
            self.sequential,
            self.cwd.clone(),
            self.env.clone(),
        )
    }

    /// Snapshot for a sub-command: identifier stack extended by `name`,
    /// sequential mode inherited.
    pub fn child(&mut self, name: &str) -> ExecContext {
        let id = self.issue_id();
        let mut ids = self.ids.clone();
        ids.push(name.to_string());
        Self::build(
            self.shared.clone(),
            ids,
            id,
            false,
            self.sequential,
            self.cwd.clone(),
            self.env.clone(),
        )
    }

    /// Apply what a successful command left behind.
    pub fn commit(&mut self, state: CapturedState) {
        if let Some(cwd) = state.cwd {
            self.cwd = Some(cwd);
        }
        if state.env.is_empty() {
            return;
        }
        let overlay = self.env.get_or_insert_with(BTreeMap::new);
        for (k, v) in state.env {
            if SHELL_MANAGED_VARS.contains(&k.as_str()) {
                continue;
            }
            overlay.insert(k, v);
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn output(&self) -> &OutputChannel {
        &self.output
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_sequential(&self) -> bool {
        self.sequential
    }

    pub(crate) fn set_sequential(&mut self, sequential: bool) {
        self.sequential = sequential;
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn env(&self) -> Option<&BTreeMap<String, String>> {
        self.env.as_ref()
    }

    /// Human-readable identifier, e.g. `build:lint` or `build:lint#3`.
    pub fn label(&self) -> String {
        render_label(&self.ids, self.branch.then_some(self.id))
    }

    /// Prefix used to attribute errors, e.g. `[build:lint] `.
    pub fn error_prefix(&self) -> String {
        let label = self.label();
        if label.is_empty() {
            String::new()
        } else {
            format!("[{label}] ")
        }
    }
}

fn render_label(ids: &[String], branch: Option<u64>) -> String {
    let mut label = ids.join(":");
    if let Some(id) = branch {
        label.push_str(&format!("#{id}"));
    }
    label
}
