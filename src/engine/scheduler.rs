// src/engine/scheduler.rs

//! Execution-tree scheduler.
//!
//! Walks resolved [`Node`]s left to right inside one [`ExecContext`].
//! Sequential siblings abort on the first failure; parallel branches each
//! get a forked context, all run to completion, and the first failure in
//! submission order is returned.

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tracing::{debug, warn};

use crate::engine::context::ExecContext;
use crate::engine::node::{Node, SubCommandRef};
use crate::engine::runtime::Scope;
use crate::errors::{Result, TaskchainError};
use crate::exec::task_runner::run_shell;
use crate::types::StreamKind;

/// Nesting limit for sub-command references.
pub const MAX_DEPTH: usize = 64;

/// Run `nodes` in order inside `ctx`.
pub(crate) fn run_nodes<'a>(
    ctx: &'a mut ExecContext,
    nodes: &'a [Node],
) -> BoxFuture<'a, Result<()>> {
    async move {
        for node in nodes {
            run_node(ctx, node).await?;
        }
        Ok(())
    }
    .boxed()
}

async fn run_node(ctx: &mut ExecContext, node: &Node) -> Result<()> {
    match node {
        Node::Help(text) => {
            ctx.output().line_now(StreamKind::Stdout, text);
            Ok(())
        }
        Node::Shell { command, verbosity } => run_shell(ctx, command, *verbosity).await,
        Node::SubCommand(reference) => run_sub_command(ctx, reference).await,
        Node::Sequence(children) => {
            let previous = ctx.is_sequential();
            ctx.set_sequential(true);
            let res = run_nodes(ctx, children).await;
            ctx.set_sequential(previous);
            res
        }
        Node::Parallel(children) => run_parallel(ctx, children).await,
    }
}

async fn run_parallel(ctx: &mut ExecContext, children: &[Node]) -> Result<()> {
    // Every branch snapshots the parent before any of them starts.
    let mut branches: Vec<ExecContext> = children.iter().map(|_| ctx.fork_branch()).collect();
    debug!(context = %ctx.label(), branches = branches.len(), "parallel fan-out");

    let results = join_all(
        branches
            .iter_mut()
            .zip(children)
            .map(|(branch, node)| run_nodes(branch, std::slice::from_ref(node))),
    )
    .await;

    let mut first = None;
    for (branch, res) in branches.iter().zip(results) {
        if let Err(e) = res {
            warn!(context = %branch.label(), error = %e, "parallel branch failed");
            first.get_or_insert(e);
        }
    }
    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn run_sub_command(ctx: &mut ExecContext, reference: &SubCommandRef) -> Result<()> {
    let shared = ctx.shared().clone();
    let prefix = ctx.error_prefix();
    let name = reference.name.as_str();

    let unknown = || TaskchainError::config(prefix.clone(), format!("unknown command `{name}`"));
    let handler = shared.registry.handler(name).ok_or_else(unknown)?;
    let validated = match shared
        .registry
        .validate(name, reference.args.clone(), reference.forwarded)
    {
        Some(Ok(v)) => v,
        Some(Err(message)) => {
            return Err(TaskchainError::config(prefix.clone(), format!("`{name}`: {message}")));
        }
        None => return Err(unknown()),
    };

    if !validated.ignored.is_empty() {
        let ignored = validated.ignored.join(", ");
        warn!(context = %ctx.label(), command = name, %ignored, "dropping forwarded arguments");
        ctx.output().line(
            StreamKind::Stderr,
            &format!("warning: `{name}` does not accept forwarded argument(s) {ignored}"),
        );
    }

    if ctx.ids().len() >= MAX_DEPTH {
        return Err(TaskchainError::config(
            prefix,
            format!("sub-command nesting deeper than {MAX_DEPTH} levels at `{name}`"),
        ));
    }

    let child = ctx.child(name);
    debug!(context = %child.label(), sequential = child.is_sequential(), "entering sub-command");
    let args = validated.args;
    handler.run(Scope::new(child, args.clone()), args).await
}
