#![allow(dead_code)]

pub use taskchain_test_utils::{
    Captured, Harness, Recorder, init_tracing, test_config, with_timeout,
};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
