#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use taskchain::cache::ScriptIdentity;
use taskchain::exec::{CaptureBuffer, OutputMux};
use taskchain::{Args, Engine, EngineConfig, Registry, Result, Scope};

/// Engine settings suited to tests: rooted at `root`, no colors, fast
/// flushes, no tool directory on the path.
pub fn test_config(root: &Path) -> EngineConfig {
    EngineConfig::default()
        .with_root(root)
        .with_color(false)
        .with_concurrency(4)
        .with_flush_interval(Duration::from_millis(10))
        .with_tool_bin_dir(None)
}

/// Multiplexer writing into memory.
#[derive(Clone)]
pub struct Captured {
    pub mux: OutputMux,
    out: CaptureBuffer,
    err: CaptureBuffer,
}

impl Captured {
    pub fn new() -> Self {
        let out = CaptureBuffer::new();
        let err = CaptureBuffer::new();
        let mux = OutputMux::with_writers(Box::new(out.clone()), Box::new(err.clone()), false);
        Self { mux, out, err }
    }

    pub fn stdout(&self) -> String {
        self.out.contents()
    }

    pub fn stderr(&self) -> String {
        self.err.contents()
    }
}

impl Default for Captured {
    fn default() -> Self {
        Self::new()
    }
}

/// An engine whose output is captured.
pub struct Harness {
    pub engine: Engine,
    pub output: Captured,
}

impl Harness {
    pub fn new(config: EngineConfig, registry: Registry) -> Self {
        Self::with_identity(config, registry, ScriptIdentity::from_bytes(b"test-commands"))
    }

    pub fn with_identity(config: EngineConfig, registry: Registry, identity: ScriptIdentity) -> Self {
        let output = Captured::new();
        let engine = Engine::builder(config, registry)
            .output(output.mux.clone())
            .script_identity(identity)
            .build()
            .expect("valid engine config");
        Self { engine, output }
    }

    pub async fn run(&self, name: &str) -> Result<()> {
        self.engine.run(name, Args::new()).await
    }
}

/// Thread-safe list of things that happened, in order.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Handler that records `name` plus its arguments as JSON and does
    /// nothing else.
    pub fn handler(
        &self,
        name: &str,
    ) -> impl Fn(Scope, Args) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static {
        let recorder = self.clone();
        let name = name.to_string();
        move |scope: Scope, args: Args| {
            let event = format!(
                "{name} {} seq={}",
                serde_json::to_string(&args).unwrap_or_default(),
                scope.is_sequential()
            );
            recorder.push(event);
            async { Ok(()) }.boxed()
        }
    }
}
