// src/exec/output.rs

//! Output multiplexer.
//!
//! Every execution context writes through its own [`OutputChannel`]. Chunks
//! are queued per channel and only reach the real streams on
//! [`OutputMux::flush`], which the subprocess runner calls on a timer and
//! once more when a command completes.
//!
//! Prefixing rules:
//! - the channel prefix is written at the start of every *new* line;
//! - a chunk that continues the open (unterminated) line of the same channel
//!   and stream is written as-is;
//! - if another channel or stream left a line open, that line is terminated
//!   first, so a prefix never lands in the middle of someone else's line.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use colored::{Color, Colorize};
use tracing::warn;

use crate::types::StreamKind;

/// Colors handed out to contexts, cycled by branch id.
pub const PALETTE: [Color; 6] = [
    Color::Cyan,
    Color::Green,
    Color::Yellow,
    Color::Blue,
    Color::Magenta,
    Color::BrightRed,
];

/// One queued piece of subprocess output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub kind: StreamKind,
    pub bytes: Vec<u8>,
}

struct ChannelQueue {
    prefix: String,
    chunks: Vec<Chunk>,
}

struct MuxState {
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
    channels: BTreeMap<u64, ChannelQueue>,
    next_key: u64,
    /// Channel and stream whose last line has not been terminated yet.
    open_line: Option<(u64, StreamKind)>,
}

impl MuxState {
    fn stream(&mut self, kind: StreamKind) -> &mut (dyn Write + Send) {
        match kind {
            StreamKind::Stdout => self.out.as_mut(),
            StreamKind::Stderr => self.err.as_mut(),
        }
    }

    fn emit(&mut self, key: u64, prefix: &str, chunk: &Chunk) -> io::Result<()> {
        let mut rest: &[u8] = &chunk.bytes;
        while !rest.is_empty() {
            let (segment, tail, ends_line) = match rest.iter().position(|b| *b == b'\n') {
                Some(i) => (&rest[..=i], &rest[i + 1..], true),
                None => (rest, &rest[rest.len()..], false),
            };

            if self.open_line != Some((key, chunk.kind)) {
                if let Some((_, open_kind)) = self.open_line.take() {
                    self.stream(open_kind).write_all(b"\n")?;
                }
                self.stream(chunk.kind).write_all(prefix.as_bytes())?;
            }
            self.stream(chunk.kind).write_all(segment)?;

            self.open_line = if ends_line {
                None
            } else {
                Some((key, chunk.kind))
            };
            rest = tail;
        }
        Ok(())
    }

    fn drain(&mut self, key: u64) -> io::Result<()> {
        let Some(queue) = self.channels.get_mut(&key) else {
            return Ok(());
        };
        if queue.chunks.is_empty() {
            return Ok(());
        }
        let chunks = std::mem::take(&mut queue.chunks);
        let prefix = queue.prefix.clone();
        for chunk in &chunks {
            self.emit(key, &prefix, chunk)?;
        }
        Ok(())
    }

    fn flush_all(&mut self) -> io::Result<()> {
        let keys: Vec<u64> = self.channels.keys().copied().collect();
        for key in keys {
            self.drain(key)?;
        }
        self.out.flush()?;
        self.err.flush()
    }
}

/// Shared handle to the multiplexer. Cheap to clone.
#[derive(Clone)]
pub struct OutputMux {
    state: Arc<Mutex<MuxState>>,
    color: bool,
}

impl fmt::Debug for OutputMux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputMux")
            .field("color", &self.color)
            .finish_non_exhaustive()
    }
}

impl OutputMux {
    /// Multiplexer writing to the process's real stdout / stderr.
    pub fn stdio(color: bool) -> Self {
        Self::with_writers(Box::new(io::stdout()), Box::new(io::stderr()), color)
    }

    /// Multiplexer writing to arbitrary sinks (used to capture output).
    pub fn with_writers(
        out: Box<dyn Write + Send>,
        err: Box<dyn Write + Send>,
        color: bool,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(MuxState {
                out,
                err,
                channels: BTreeMap::new(),
                next_key: 0,
                open_line: None,
            })),
            color,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MuxState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a channel whose lines are prefixed with `[label] `.
    ///
    /// An empty label produces unprefixed output. `color_index` selects the
    /// palette entry.
    pub fn channel(&self, label: &str, color_index: u64) -> OutputChannel {
        let prefix = self.render_prefix(label, color_index);
        let mut state = self.lock();
        let key = state.next_key;
        state.next_key += 1;
        state.channels.insert(
            key,
            ChannelQueue {
                prefix,
                chunks: Vec::new(),
            },
        );
        OutputChannel {
            mux: self.clone(),
            key,
        }
    }

    fn render_prefix(&self, label: &str, color_index: u64) -> String {
        if label.is_empty() {
            return String::new();
        }
        let text = format!("[{label}]");
        if self.color {
            let color = PALETTE[(color_index % PALETTE.len() as u64) as usize];
            format!("{} ", text.color(color))
        } else {
            format!("{text} ")
        }
    }

    /// Write every queued chunk to the real streams.
    pub fn flush(&self) {
        if let Err(e) = self.lock().flush_all() {
            warn!(error = %e, "failed to flush multiplexed output");
        }
    }

    /// Flush and terminate any line left open. Called once a run is over.
    pub fn finish(&self) {
        let mut state = self.lock();
        let res = state.flush_all().and_then(|_| {
            if let Some((_, kind)) = state.open_line.take() {
                let stream = state.stream(kind);
                stream.write_all(b"\n")?;
                stream.flush()?;
            }
            Ok(())
        });
        if let Err(e) = res {
            warn!(error = %e, "failed to finish multiplexed output");
        }
    }

    fn push(&self, key: u64, chunk: Chunk) {
        let mut state = self.lock();
        if let Some(queue) = state.channels.get_mut(&key) {
            match queue.chunks.last_mut() {
                Some(last) if last.kind == chunk.kind => last.bytes.extend_from_slice(&chunk.bytes),
                _ => queue.chunks.push(chunk),
            }
        }
    }

    fn close(&self, key: u64) {
        let mut state = self.lock();
        if let Err(e) = state.drain(key) {
            warn!(error = %e, "failed to flush output of closing channel");
        }
        state.channels.remove(&key);
    }
}

/// Per-context writer into the multiplexer.
///
/// Dropping the channel flushes whatever it still has queued.
pub struct OutputChannel {
    mux: OutputMux,
    key: u64,
}

impl fmt::Debug for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputChannel").field("key", &self.key).finish()
    }
}

impl OutputChannel {
    /// Queue raw bytes.
    pub fn write(&self, kind: StreamKind, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.mux.push(
            self.key,
            Chunk {
                kind,
                bytes: bytes.to_vec(),
            },
        );
    }

    /// Queue a full line.
    pub fn line(&self, kind: StreamKind, text: &str) {
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(b'\n');
        self.write(kind, &bytes);
    }

    /// Queue a line and flush right away.
    pub fn line_now(&self, kind: StreamKind, text: &str) {
        self.line(kind, text);
        self.mux.flush();
    }

    pub fn mux(&self) -> &OutputMux {
        &self.mux
    }
}

impl Drop for OutputChannel {
    fn drop(&mut self) {
        self.mux.close(self.key);
    }
}

/// In-memory sink that can be handed to [`OutputMux::with_writers`] and read
/// back afterwards.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let bytes = self.bytes.lock().unwrap_or_else(|p| p.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
