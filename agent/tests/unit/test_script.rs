//! Script executor tests

#![cfg(unix)]

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use cdagent::deploy::script::{ScriptCommand, ScriptExecutor};
use cdagent::environment::Platform;
use cdagent::errors::AgentError;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

fn sh(script: &str) -> ScriptCommand {
    ScriptCommand::new("sh", vec!["-c".to_string(), script.to_string()])
}

#[tokio::test]
async fn test_timeout_kills_and_keeps_output() {
    let executor = ScriptExecutor::default();
    let started = Instant::now();

    let outcome = executor
        .execute(
            &sh("echo before-sleep; sleep 10; echo after-sleep"),
            &BTreeMap::new(),
            Duration::from_millis(500),
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(outcome.timed_out);
    assert!(!outcome.is_success());
    assert_ne!(outcome.exit_code, 0);
    assert!(outcome.output.contains("before-sleep"));
    assert!(!outcome.output.contains("after-sleep"));

    let err = outcome.into_result("BeforeInstall").unwrap_err();
    assert!(matches!(err, AgentError::ScriptTimeout(_)));
}

#[tokio::test]
async fn test_timeout_kills_background_children() {
    let executor = ScriptExecutor::default();
    let started = Instant::now();

    // The grandchild keeps stdout open; killing the group must release it
    let outcome = executor
        .execute(
            &sh("sleep 10 & echo spawned; wait"),
            &BTreeMap::new(),
            Duration::from_millis(300),
        )
        .await
        .unwrap();

    assert!(outcome.timed_out);
    assert!(outcome.output.contains("spawned"));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_exit_code_and_merged_output() {
    let executor = ScriptExecutor::default();
    let outcome = executor
        .execute(
            &sh("echo out; echo err 1>&2; exit 3"),
            &BTreeMap::new(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert!(!outcome.timed_out);
    assert_eq!(outcome.exit_code, 3);
    assert!(outcome.output.contains("out"));
    assert!(outcome.output.contains("err"));

    let err = outcome.into_result("ApplicationStart").unwrap_err();
    assert!(err.to_string().contains("exit code 3"));
}

#[tokio::test]
async fn test_run_script_with_environment() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("hook.sh");
    tokio::fs::write(&script, "#!/bin/sh\necho \"event=$LIFECYCLE_EVENT\"\n")
        .await
        .unwrap();

    let mut env = BTreeMap::new();
    env.insert("LIFECYCLE_EVENT".to_string(), "AfterInstall".to_string());

    let executor = ScriptExecutor::default();
    let outcome = assert_ok!(
        executor
            .run_script(&script, None, Platform::Linux, &env, Duration::from_secs(5))
            .await
    );
    assert!(outcome.is_success());
    assert!(outcome.output.contains("event=AfterInstall"));
}

#[tokio::test]
async fn test_missing_program_is_an_error() {
    let executor = ScriptExecutor::default();
    let result = executor
        .execute(
            &ScriptCommand::new("/nonexistent/program", Vec::new()),
            &BTreeMap::new(),
            Duration::from_secs(1),
        )
        .await;
    assert_err!(result);
}
