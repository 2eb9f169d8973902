// src/exec/task_runner.rs

//! Single shell command runner.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::engine::context::ExecContext;
use crate::errors::{Result, TaskchainError};
use crate::exec::output::{OutputChannel, OutputMux};
use crate::exec::state_capture::StateFiles;
use crate::shell::Shell;
use crate::types::{StreamKind, Verbosity};

const READ_BUF: usize = 8192;

/// Run `command` in the shell on behalf of `ctx`.
///
/// On success the command's final working directory and environment are
/// committed into `ctx`. Failures are written to the context's stderr
/// before being returned.
pub async fn run_shell(ctx: &mut ExecContext, command: &str, verbosity: Verbosity) -> Result<()> {
    let shared = ctx.shared().clone();
    let config = &shared.config;
    let label = ctx.label();

    if verbosity.echoes_command() {
        ctx.output().line(StreamKind::Stdout, &format!("$ {command}"));
    }

    let files = StateFiles::create()?;
    let script = shared
        .shell
        .wrap_script(command, ctx.cwd(), files.cwd_path(), files.env_path());

    let mut cmd = shared.shell.command(&script);
    cmd.current_dir(&config.root);
    if let Some(env) = ctx.env() {
        cmd.envs(env);
    }
    if let Some(bin) = config.tool_bin_path() {
        prepend_tool_dir(&mut cmd, &shared.shell, ctx.env(), &bin);
    }
    cmd.stdin(Stdio::inherit())
        .stdout(if verbosity.captures_stdout() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(context = %label, command, cwd = ?ctx.cwd(), "running shell command");
    let started = Instant::now();
    let outcome = shared
        .limiter
        .run(drive(cmd, ctx.output(), config.flush_interval))
        .await;
    let elapsed = started.elapsed();
    ctx.output().mux().flush();

    let status = match outcome {
        Ok(status) => status,
        Err(source) => {
            warn!(context = %label, command, error = %source, "failed to spawn shell");
            ctx.output().line_now(
                StreamKind::Stderr,
                &format!("failed to start `{command}`: {source}"),
            );
            return Err(TaskchainError::Spawn {
                context: ctx.error_prefix(),
                command: command.to_string(),
                source,
            });
        }
    };

    if config.profile && verbosity != Verbosity::Silent {
        ctx.output().line_now(
            StreamKind::Stdout,
            &format!("finished in {:.2}s", elapsed.as_secs_f64()),
        );
    }

    if status.success() {
        let state = files.read(shared.shell.kind()).await?;
        debug!(context = %label, command, cwd = ?state.cwd, vars = state.env.len(), "command succeeded");
        ctx.commit(state);
        return Ok(());
    }

    let error = match (status.code(), signal_of(&status)) {
        (None, Some(signal)) => TaskchainError::CommandSignaled {
            context: ctx.error_prefix(),
            command: command.to_string(),
            signal: signal_name(signal),
        },
        (code, _) => TaskchainError::CommandFailed {
            context: ctx.error_prefix(),
            command: command.to_string(),
            code: code.unwrap_or(-1),
        },
    };
    debug!(context = %label, command, ?status, "command failed");
    ctx.output().line_now(StreamKind::Stderr, &failure_line(&error));
    Err(error)
}

/// Spawn, stream both pipes into `output`, and flush on a timer until the
/// process and its pipes are done.
async fn drive(
    mut cmd: Command,
    output: &OutputChannel,
    flush_every: Duration,
) -> std::io::Result<ExitStatus> {
    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (done_tx, done_rx) = oneshot::channel::<()>();

    let work = async {
        let (status, (), ()) = tokio::join!(
            child.wait(),
            pump(stdout, StreamKind::Stdout, output),
            pump(stderr, StreamKind::Stderr, output),
        );
        let _ = done_tx.send(());
        status
    };
    let (status, ()) = tokio::join!(work, ticker(output.mux(), flush_every, done_rx));
    status
}

async fn pump<R>(reader: Option<R>, kind: StreamKind, output: &OutputChannel)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = vec![0u8; READ_BUF];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => output.write(kind, &buf[..n]),
            Err(e) => {
                debug!(?kind, error = %e, "output pipe closed with error");
                break;
            }
        }
    }
}

async fn ticker(mux: &OutputMux, every: Duration, mut done: oneshot::Receiver<()>) {
    let mut interval = tokio::time::interval(every);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = &mut done => break,
            _ = interval.tick() => mux.flush(),
        }
    }
}

/// Put the tool binary directory in front of the search path the command
/// will see.
fn prepend_tool_dir(
    cmd: &mut Command,
    shell: &Shell,
    overlay: Option<&BTreeMap<String, String>>,
    bin: &Path,
) {
    let ambient: Vec<String> = std::env::vars_os()
        .filter_map(|(k, _)| k.into_string().ok())
        .collect();
    let keys = overlay
        .into_iter()
        .flat_map(|env| env.keys())
        .chain(ambient.iter())
        .map(String::as_str);
    let name = shell.path_var_name(keys);

    let current = overlay
        .and_then(|env| env.get(&name).cloned())
        .or_else(|| std::env::var(&name).ok());
    if let Some(value) = shell.prepend_to_path(current.as_deref(), bin) {
        cmd.env(&name, value);
    }
}

fn failure_line(error: &TaskchainError) -> String {
    match error {
        TaskchainError::CommandFailed { command, code, .. } => {
            format!("command failed with exit code {code}: {command}")
        }
        TaskchainError::CommandSignaled {
            command, signal, ..
        } => format!("command terminated by {signal}: {command}"),
        other => other.to_string(),
    }
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &ExitStatus) -> Option<i32> {
    None
}

fn signal_name(signal: i32) -> String {
    let name = match signal {
        1 => "SIGHUP",
        2 => "SIGINT",
        3 => "SIGQUIT",
        6 => "SIGABRT",
        9 => "SIGKILL",
        13 => "SIGPIPE",
        14 => "SIGALRM",
        15 => "SIGTERM",
        n => return format!("signal {n}"),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_names() {
        assert_eq!(signal_name(15), "SIGTERM");
        assert_eq!(signal_name(9), "SIGKILL");
        assert_eq!(signal_name(40), "signal 40");
    }

    #[test]
    fn failure_lines_name_the_command() {
        let err = TaskchainError::CommandFailed {
            context: "[build] ".into(),
            command: "make".into(),
            code: 2,
        };
        assert_eq!(failure_line(&err), "command failed with exit code 2: make");
    }
}
