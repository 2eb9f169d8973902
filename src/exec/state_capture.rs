// src/exec/state_capture.rs

//! Recovering a child shell's final working directory and environment.
//!
//! A child process cannot hand its state back to the parent, so the wrapper
//! script (see [`crate::shell::Shell::wrap_script`]) dumps `pwd` and the
//! environment listing into two private temp files which are read back here.
//! Both files are [`TempPath`]s and are removed when [`StateFiles`] is
//! dropped, on every exit path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;
use tempfile::{Builder, TempPath};

use crate::errors::Result;
use crate::shell::ShellKind;

/// `NAME=value` at the start of a line of a `set` listing. Lines that don't
/// match continue the previous value.
static ENV_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_()]*)=(.*)$").expect("environment line pattern is valid")
});

/// The pair of temp files a single command writes its state into.
#[derive(Debug)]
pub struct StateFiles {
    cwd: TempPath,
    env: TempPath,
}

/// What a successful command left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedState {
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl StateFiles {
    pub fn create() -> Result<Self> {
        let cwd = Builder::new()
            .prefix("taskchain-cwd-")
            .tempfile()
            .context("creating cwd capture file")?
            .into_temp_path();
        let env = Builder::new()
            .prefix("taskchain-env-")
            .tempfile()
            .context("creating env capture file")?
            .into_temp_path();
        Ok(Self { cwd, env })
    }

    pub fn cwd_path(&self) -> &Path {
        &self.cwd
    }

    pub fn env_path(&self) -> &Path {
        &self.env
    }

    /// Read both files back, parsing the environment in the format `kind`
    /// dumps it in. Empty files (the command never reached the dump
    /// statements, e.g. it called `exit 0` itself) yield an empty state.
    pub async fn read(&self, kind: ShellKind) -> Result<CapturedState> {
        let cwd_raw = tokio::fs::read(&self.cwd)
            .await
            .with_context(|| format!("reading {:?}", self.cwd_path()))?;
        let env_raw = tokio::fs::read(&self.env)
            .await
            .with_context(|| format!("reading {:?}", self.env_path()))?;

        let cwd_text = String::from_utf8_lossy(&cwd_raw);
        let cwd = cwd_text.trim_end_matches(['\r', '\n']);
        let cwd = (!cwd.is_empty()).then(|| PathBuf::from(cwd));

        Ok(CapturedState {
            cwd,
            env: match kind {
                ShellKind::Posix => parse_env_nul(&env_raw),
                ShellKind::Cmd => parse_env_dump(&String::from_utf8_lossy(&env_raw)),
            },
        })
    }
}

/// Parse the output of `env -0`: `NAME=value` records separated by NUL, so
/// values may contain newlines and anything else but NUL.
pub fn parse_env_nul(raw: &[u8]) -> BTreeMap<String, String> {
    raw.split(|b| *b == 0)
        .filter_map(|record| {
            let record = String::from_utf8_lossy(record);
            let (name, value) = record.split_once('=')?;
            (!name.is_empty()).then(|| (name.to_string(), value.to_string()))
        })
        .collect()
}

/// Parse the output of cmd's `set`.
pub fn parse_env_dump(text: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    let mut current: Option<(String, String)> = None;

    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(caps) = ENV_LINE.captures(line) {
            if let Some((k, v)) = current.take() {
                vars.insert(k, v);
            }
            current = Some((caps[1].to_string(), caps[2].to_string()));
        } else if let Some((_, v)) = current.as_mut() {
            v.push('\n');
            v.push_str(line);
        }
    }
    if let Some((k, v)) = current {
        vars.insert(k, v);
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_and_multiline_values() {
        let dump = "HOME=/home/me\nGREETING=hello\nworld\nEMPTY=\nPATH=/usr/bin:/bin\n";
        let vars = parse_env_dump(dump);
        assert_eq!(vars["HOME"], "/home/me");
        assert_eq!(vars["GREETING"], "hello\nworld");
        assert_eq!(vars["EMPTY"], "");
        assert_eq!(vars["PATH"], "/usr/bin:/bin");
    }

    #[test]
    fn nul_records_keep_newlines_and_exported_functions_intact() {
        let dump = b"HOME=/home/me\0BASH_FUNC_which%%=() {  ( alias;\n eval ${which_declare} ) | /usr/bin/which\n}\0NOTE=line one\nX=y\0PATH=/usr/bin\0";
        let vars = parse_env_nul(dump);
        assert_eq!(vars["HOME"], "/home/me");
        assert_eq!(
            vars["BASH_FUNC_which%%"],
            "() {  ( alias;\n eval ${which_declare} ) | /usr/bin/which\n}"
        );
        assert_eq!(vars["NOTE"], "line one\nX=y");
        assert!(!vars.contains_key("X"));
        assert_eq!(vars["PATH"], "/usr/bin");
        assert_eq!(vars.len(), 4);
    }

    #[test]
    fn parses_cmd_style_listing() {
        let dump = "ProgramFiles(x86)=C:\\Program Files (x86)\r\nPath=C:\\bin;C:\\tools\r\n";
        let vars = parse_env_dump(dump);
        assert_eq!(vars["ProgramFiles(x86)"], "C:\\Program Files (x86)");
        assert_eq!(vars["Path"], "C:\\bin;C:\\tools");
    }

    #[tokio::test]
    async fn files_are_removed_on_drop() {
        let files = StateFiles::create().unwrap();
        let cwd = files.cwd_path().to_path_buf();
        let env = files.env_path().to_path_buf();
        std::fs::write(&cwd, "/work/sub\n").unwrap();
        std::fs::write(&env, "A=1\0B=two\nlines\0").unwrap();

        let state = files.read(ShellKind::Posix).await.unwrap();
        assert_eq!(state.cwd, Some(PathBuf::from("/work/sub")));
        assert_eq!(state.env["A"], "1");
        assert_eq!(state.env["B"], "two\nlines");

        drop(files);
        assert!(!cwd.exists());
        assert!(!env.exists());
    }

    #[tokio::test]
    async fn empty_files_mean_no_state() {
        let files = StateFiles::create().unwrap();
        assert_eq!(files.read(ShellKind::Posix).await.unwrap(), CapturedState::default());
    }
}
