// src/shell/mod.rs

//! Platform shell adapter.
//!
//! Everything that differs between a POSIX `sh` and the Windows command
//! interpreter lives here:
//! - which program runs a command line, and with which flags
//! - how an argument (a directory, a temp-file path) is quoted
//! - which spelling of the `PATH` variable is in effect
//! - how the wrapper script that captures the final cwd/env is assembled
//!
//! The rest of the crate only ever sees a [`Shell`] value.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::process::Command;

/// Flavour of shell a [`Shell`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    Posix,
    Cmd,
}

/// A concrete shell executable plus its flavour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    program: PathBuf,
    kind: ShellKind,
}

impl Shell {
    /// Pick the platform default shell by probing the environment.
    ///
    /// - Windows: `%ComSpec%`, falling back to `cmd.exe`.
    /// - Everything else: `/bin/sh`.
    pub fn detect() -> Self {
        if cfg!(windows) {
            let program = std::env::var_os("ComSpec")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("cmd.exe"));
            Self::cmd(program)
        } else {
            Self::posix("/bin/sh")
        }
    }

    pub fn posix(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            kind: ShellKind::Posix,
        }
    }

    pub fn cmd(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            kind: ShellKind::Cmd,
        }
    }

    pub fn kind(&self) -> ShellKind {
        self.kind
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Build a (not yet spawned) process running `script` through this shell.
    pub fn command(&self, script: &str) -> Command {
        let mut c = Command::new(&self.program);
        match self.kind {
            ShellKind::Posix => {
                c.arg("-c").arg(script);
            }
            ShellKind::Cmd => {
                c.arg("/d").arg("/s").arg("/c").arg(script);
            }
        }
        c
    }

    /// Quote a single argument so the shell passes it through literally.
    pub fn escape(&self, arg: &str) -> String {
        match self.kind {
            ShellKind::Posix => format!("'{}'", arg.replace('\'', "'\\''")),
            ShellKind::Cmd => format!("\"{}\"", arg.replace('"', "\"\"")),
        }
    }

    /// Render a path the way this shell expects it.
    ///
    /// For `cmd` forward slashes become backslashes and the `\\?\` verbatim
    /// prefix produced by `canonicalize` is dropped. POSIX paths are left
    /// alone: a backslash is a legal file-name character there.
    pub fn normalize_path(&self, path: &Path) -> String {
        let s = path.to_string_lossy();
        match self.kind {
            ShellKind::Posix => s.into_owned(),
            ShellKind::Cmd => {
                let s = s.strip_prefix(r"\\?\").unwrap_or(&s);
                s.replace('/', "\\")
            }
        }
    }

    /// Name of the search-path variable, honouring an existing spelling.
    ///
    /// Windows environments usually spell it `Path`; whatever casing is
    /// already present among `keys` wins.
    pub fn path_var_name<'a, I>(&self, keys: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        match self.kind {
            ShellKind::Posix => "PATH".to_string(),
            ShellKind::Cmd => keys
                .into_iter()
                .find(|k| k.eq_ignore_ascii_case("path"))
                .map(str::to_string)
                .unwrap_or_else(|| "Path".to_string()),
        }
    }

    /// Return `current` with `bin_dir` prepended, or `None` if `bin_dir` is
    /// already one of its entries.
    pub fn prepend_to_path(&self, current: Option<&str>, bin_dir: &Path) -> Option<OsString> {
        let existing: Vec<PathBuf> = current
            .map(|v| std::env::split_paths(v).collect())
            .unwrap_or_default();
        if existing.iter().any(|p| p == bin_dir) {
            return None;
        }
        let mut entries = Vec::with_capacity(existing.len() + 1);
        entries.push(bin_dir.to_path_buf());
        entries.extend(existing);
        std::env::join_paths(entries).ok()
    }

    /// Assemble the script actually handed to the shell.
    ///
    /// - `cwd`, when given, is entered first.
    /// - After `command`, and only if it succeeded, the final working
    ///   directory is written to `cwd_file` and the environment listing to
    ///   `env_file` (NUL-separated for POSIX, `set` output for cmd).
    /// - The exit status of `command` is preserved.
    pub fn wrap_script(
        &self,
        command: &str,
        cwd: Option<&Path>,
        cwd_file: &Path,
        env_file: &Path,
    ) -> String {
        let cwd_out = self.escape(&self.normalize_path(cwd_file));
        let env_out = self.escape(&self.normalize_path(env_file));

        match self.kind {
            ShellKind::Posix => {
                let mut script = String::new();
                if let Some(dir) = cwd {
                    script.push_str(&format!(
                        "cd {} || exit $?\n",
                        self.escape(&self.normalize_path(dir))
                    ));
                }
                script.push_str(command);
                script.push('\n');
                script.push_str("__taskchain_status=$?\n");
                script.push_str(&format!(
                    "if [ \"$__taskchain_status\" -eq 0 ]; then pwd > {cwd_out} && env -0 > {env_out}; fi\n"
                ));
                script.push_str("exit $__taskchain_status");
                script
            }
            ShellKind::Cmd => {
                let mut script = String::new();
                if let Some(dir) = cwd {
                    script.push_str(&format!(
                        "cd /d {} && ",
                        self.escape(&self.normalize_path(dir))
                    ));
                }
                script.push_str(command);
                script.push_str(&format!(" && cd > {cwd_out} && set > {env_out}"));
                script
            }
        }
    }
}

impl Default for Shell {
    fn default() -> Self {
        Shell::detect()
    }
}
