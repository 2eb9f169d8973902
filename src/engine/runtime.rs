// src/engine/runtime.rs

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::{ChangeCache, Delta, ScriptIdentity};
use crate::config::EngineConfig;
use crate::engine::context::ExecContext;
use crate::engine::node::{Node, RawNode, SubCommandRef, resolve};
use crate::engine::registry::{Args, CommandRegistry};
use crate::engine::scheduler::run_nodes;
use crate::errors::{Result, TaskchainError};
use crate::exec::limiter::Limiter;
use crate::exec::output::OutputMux;
use crate::fs::{FileSystem, RealFileSystem};
use crate::shell::Shell;
use crate::types::StreamKind;

/// Everything a run shares between its contexts.
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) registry: Arc<dyn CommandRegistry>,
    pub(crate) limiter: Limiter,
    pub(crate) mux: OutputMux,
    pub(crate) shell: Shell,
    pub(crate) cache: Arc<ChangeCache>,
}

/// Entry point: owns the registry, limiter, multiplexer and change cache.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.shared.config.root)
            .field("concurrency", &self.shared.limiter.limit())
            .finish_non_exhaustive()
    }
}

/// Optional collaborators for [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    registry: Arc<dyn CommandRegistry>,
    mux: Option<OutputMux>,
    shell: Option<Shell>,
    identity: ScriptIdentity,
    fs: Arc<dyn FileSystem>,
}

impl EngineBuilder {
    /// Route command output somewhere other than the real stdout/stderr.
    pub fn output(mut self, mux: OutputMux) -> Self {
        self.mux = Some(mux);
        self
    }

    pub fn shell(mut self, shell: Shell) -> Self {
        self.shell = Some(shell);
        self
    }

    /// Identity of the command file; keys the persisted cache collections.
    pub fn script_identity(mut self, identity: ScriptIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Derive the script identity from a command file's contents.
    pub fn script_file(mut self, path: &Path) -> Result<Self> {
        self.identity = ScriptIdentity::from_file(self.fs.as_ref(), path)?;
        Ok(self)
    }

    /// Filesystem used by the change cache.
    pub fn filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = self.config;
        if config.flush_interval.is_zero() {
            return Err(TaskchainError::config("", "flush interval must be > 0"));
        }
        let limiter = Limiter::new(config.concurrency)?;
        let mux = self.mux.unwrap_or_else(|| OutputMux::stdio(config.color));
        let cache = ChangeCache::new(
            self.fs,
            config.root.clone(),
            config.cache_path(),
            self.identity,
            config.hash_algorithm,
        );
        info!(
            root = ?config.root,
            concurrency = config.concurrency,
            algorithm = %config.hash_algorithm,
            "engine ready"
        );
        Ok(Engine {
            shared: Arc::new(Shared {
                registry: self.registry,
                limiter,
                mux,
                shell: self.shell.unwrap_or_default(),
                cache: Arc::new(cache),
                config,
            }),
        })
    }
}

impl Engine {
    pub fn new<R>(config: EngineConfig, registry: R) -> Result<Self>
    where
        R: CommandRegistry + 'static,
    {
        Self::builder(config, registry).build()
    }

    pub fn builder<R>(config: EngineConfig, registry: R) -> EngineBuilder
    where
        R: CommandRegistry + 'static,
    {
        EngineBuilder {
            config,
            registry: Arc::new(registry),
            mux: None,
            shell: None,
            identity: ScriptIdentity::default(),
            fs: Arc::new(RealFileSystem),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn limiter(&self) -> &Limiter {
        &self.shared.limiter
    }

    /// Run the registered command `name` with `args` as a top-level
    /// invocation.
    ///
    /// Cache collections computed during the run are persisted only if it
    /// succeeds. Errors that were not already shown by the subprocess runner
    /// are written to stderr before being returned.
    pub async fn run(&self, name: &str, args: Args) -> Result<()> {
        info!(command = name, "run started");
        self.shared.cache.reset();

        let mut root = ExecContext::root(self.shared.clone());
        let entry = [Node::SubCommand(SubCommandRef {
            name: name.to_string(),
            args,
            forwarded: false,
        })];
        let mut result = run_nodes(&mut root, &entry).await;
        if result.is_ok() {
            result = self.persist_cache();
        }

        if let Err(e) = &result {
            if !e.is_reported() {
                root.output().line(StreamKind::Stderr, &e.to_string());
            }
            info!(command = name, error = %e, "run failed");
        } else {
            info!(command = name, "run finished");
        }
        drop(root);
        self.shared.mux.finish();
        result
    }

    /// Execute ad-hoc nodes in a fresh root context.
    pub async fn exec<I>(&self, nodes: I) -> Result<Continuation>
    where
        I: IntoIterator,
        I::Item: Into<RawNode>,
    {
        let raw: Vec<RawNode> = nodes.into_iter().map(Into::into).collect();
        let mut ctx = ExecContext::root(self.shared.clone());
        let res = exec_raw(&mut ctx, &raw).await;
        if let Err(e) = &res {
            if !e.is_reported() {
                ctx.output().line(StreamKind::Stderr, &e.to_string());
            }
        }
        self.shared.mux.flush();
        res.map(|()| Continuation { ctx })
    }

    /// Write pending cache collections now.
    pub fn persist_cache(&self) -> Result<()> {
        let written = self.shared.cache.persist()?;
        debug!(written, "cache persisted");
        Ok(())
    }

    /// Flush and terminate any open output line.
    pub fn finish(&self) {
        self.shared.mux.finish();
    }
}

/// Resolve `raw` against `ctx`'s mode and run it there.
async fn exec_raw(ctx: &mut ExecContext, raw: &[RawNode]) -> Result<()> {
    let nodes = resolve(raw, ctx.is_sequential())
        .map_err(|message| TaskchainError::config(ctx.error_prefix(), message))?;
    run_nodes(ctx, &nodes).await
}

/// What a command's run routine gets to work with.
///
/// Every [`exec`](Self::exec) starts from a fresh snapshot of the state the
/// command was entered with; chaining through the returned [`Continuation`]
/// keeps the working directory and environment of earlier steps.
pub struct Scope {
    base: ExecContext,
    args: Args,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("context", &self.base)
            .field("args", &self.args)
            .finish()
    }
}

impl Scope {
    pub(crate) fn new(base: ExecContext, args: Args) -> Self {
        Self { base, args }
    }

    pub async fn exec<I>(&mut self, nodes: I) -> Result<Continuation>
    where
        I: IntoIterator,
        I::Item: Into<RawNode>,
    {
        let raw: Vec<RawNode> = nodes.into_iter().map(Into::into).collect();
        let mut ctx = self.base.fork_fresh();
        exec_raw(&mut ctx, &raw).await?;
        Ok(Continuation { ctx })
    }

    /// Changes of the files matched by `patterns` (relative to the project
    /// root) since the last successful run, under the collection `name`.
    pub async fn changes<S>(&self, name: &str, patterns: &[S]) -> Result<Delta>
    where
        S: AsRef<str>,
    {
        let cache = self.base.shared().cache.clone();
        let name = name.to_string();
        let patterns: Vec<String> = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        tokio::task::spawn_blocking(move || cache.delta(&name, &patterns))
            .await
            .map_err(anyhow::Error::from)?
    }

    /// Validated arguments of this invocation.
    pub fn args(&self) -> &Args {
        &self.args
    }

    /// Name of the running command.
    pub fn name(&self) -> &str {
        self.base.ids().last().map(String::as_str).unwrap_or_default()
    }

    pub fn ids(&self) -> &[String] {
        self.base.ids()
    }

    pub fn label(&self) -> String {
        self.base.label()
    }

    pub fn is_sequential(&self) -> bool {
        self.base.is_sequential()
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.base.cwd()
    }

    /// Write a line to this command's stdout channel.
    pub fn print(&self, text: &str) {
        self.base.output().line_now(StreamKind::Stdout, text);
    }
}

/// Handle to the context an `exec` ran in.
pub struct Continuation {
    ctx: ExecContext,
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation").field("context", &self.ctx).finish()
    }
}

impl Continuation {
    /// Run more nodes in the same context (same cwd, env and identifiers).
    pub async fn exec<I>(mut self, nodes: I) -> Result<Continuation>
    where
        I: IntoIterator,
        I::Item: Into<RawNode>,
    {
        let raw: Vec<RawNode> = nodes.into_iter().map(Into::into).collect();
        exec_raw(&mut self.ctx, &raw).await?;
        Ok(self)
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.ctx.cwd()
    }

    pub fn env(&self) -> Option<&std::collections::BTreeMap<String, String>> {
        self.ctx.env()
    }

    pub fn label(&self) -> String {
        self.ctx.label()
    }
}
