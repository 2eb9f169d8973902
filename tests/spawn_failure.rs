#![cfg(unix)]

// Kept in its own test binary: it redirects the process-wide temp directory.

mod common;
use crate::common::{Captured, TestResult, init_tracing, test_config, with_timeout};

use std::fs;

use tempfile::tempdir;

use taskchain::shell::Shell;
use taskchain::{Engine, Registry, TaskchainError};

#[tokio::test]
async fn missing_shell_is_a_spawn_error_and_leaves_no_temp_files() -> TestResult {
    init_tracing();
    let scratch = tempdir()?;
    let root = scratch.path().join("work");
    let tmp = scratch.path().join("tmp");
    fs::create_dir(&root)?;
    fs::create_dir(&tmp)?;
    tempfile::env::override_temp_dir(&tmp)
        .map_err(|current| format!("temp dir already overridden to {current:?}"))?;

    let output = Captured::new();
    let engine = Engine::builder(test_config(&root), Registry::new())
        .output(output.mux.clone())
        .shell(Shell::posix("/nonexistent/sh"))
        .build()?;

    let err = with_timeout(engine.exec(["echo never"])).await.unwrap_err();
    match &err {
        TaskchainError::Spawn { command, source, .. } => {
            assert_eq!(command, "echo never");
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(output.stderr().contains("failed to start `echo never`"));

    let leftovers: Vec<_> = fs::read_dir(&tmp)?.collect::<Result<_, _>>()?;
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    Ok(())
}
