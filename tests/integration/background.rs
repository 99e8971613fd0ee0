//! Background index job tests.
//!
//! These tests verify the lifecycle of index tasks: terminal statuses,
//! deadlines, the shared admission gate and shutdown.

use crate::common::{scripted_gateway, wait_for_completion};
use graphgate::testing::{TestHarness, populate_input};
use graphgate::{IndexRequest, JobError, TaskStatus};
use std::time::Duration;
use tempfile::TempDir;

/// Test: A successful run keeps the output of both channels.
#[tokio::test]
async fn test_index_success_records_output() {
    let dir = TempDir::new().unwrap();
    let harness = TestHarness::new(
        dir.path(),
        "echo 'step 1'; echo 'warn: slow' >&2; sleep 0.05; echo 'step 2'",
    );
    harness.populate("kb1", &[("doc.txt", "hello")]).unwrap();

    let id = harness.index_and_assert_success("kb1").await;

    let snapshot = harness.gateway().index_snapshot(&id).unwrap();
    assert_eq!(snapshot.label, "index kb1");
    let primary: Vec<&str> = snapshot
        .recent_output
        .iter()
        .map(String::as_str)
        .filter(|l| l.starts_with("step"))
        .collect();
    assert_eq!(primary, vec!["step 1", "step 2"]);
    assert!(snapshot.recent_output.iter().any(|l| l == "warn: slow"));
    assert!(snapshot.ended_at.is_some());
}

/// Test: A non-zero exit fails the task with the diagnostic text.
#[tokio::test]
async fn test_index_failure_reason() {
    let dir = TempDir::new().unwrap();
    let harness = TestHarness::new(
        dir.path(),
        "echo 'Traceback' >&2; echo 'KeyError: llm' >&2; exit 1",
    );
    harness.populate("kb1", &[("doc.txt", "hello")]).unwrap();

    let reason = harness.index_and_assert_failure("kb1").await;

    assert_eq!(reason, "Traceback\nKeyError: llm");
}

/// Test: A silent failure is described by its exit code.
#[tokio::test]
async fn test_index_silent_failure() {
    let dir = TempDir::new().unwrap();
    let harness = TestHarness::new(dir.path(), "exit 7");
    harness.populate("kb1", &[("doc.txt", "hello")]).unwrap();

    let reason = harness.index_and_assert_failure("kb1").await;

    assert!(reason.contains('7'), "unexpected reason: {}", reason);
}

/// Test: A run past its deadline is killed and fails with a timeout.
#[tokio::test]
async fn test_index_timeout() {
    let dir = TempDir::new().unwrap();
    let harness = TestHarness::new(dir.path(), "echo started; sleep 30")
        .with_index_timeout(Some(Duration::from_secs(1)));
    harness.populate("kb1", &[("doc.txt", "hello")]).unwrap();

    let reason = harness.index_and_assert_failure("kb1").await;

    assert!(reason.starts_with("timeout"), "unexpected reason: {}", reason);
}

/// Test: Missing input is refused without creating a task.
#[tokio::test]
async fn test_index_missing_input_is_rejected() {
    let dir = TempDir::new().unwrap();
    let harness = TestHarness::new(dir.path(), "exit 0");

    let err = harness.index("kb1").await.unwrap_err();

    assert!(matches!(err, JobError::Precondition(_)));
    assert!(harness.gateway().registry().is_empty());
}

/// Test: Every submission gets its own task.
#[tokio::test]
async fn test_index_task_ids_are_unique() {
    let dir = TempDir::new().unwrap();
    let gateway = scripted_gateway(dir.path(), "exit 0", 4);
    populate_input(gateway.knowledge_bases(), "kb1", &[("doc.txt", "hello")]).unwrap();

    let first = gateway.submit_index(&IndexRequest::new("kb1")).unwrap();
    let second = gateway.submit_index(&IndexRequest::new("kb1")).unwrap();

    assert_ne!(first, second);
    for id in [first, second] {
        let status = wait_for_completion(gateway.registry(), &id, Duration::from_secs(10)).await;
        assert_eq!(status, TaskStatus::Succeeded);
    }
}

/// Test: With a gate of one, index runs never overlap.
#[tokio::test]
async fn test_index_jobs_respect_admission_gate() {
    let dir = TempDir::new().unwrap();
    // mkdir fails if another run holds the lock directory.
    let script = r#"mkdir "$3/../lock" || exit 3; sleep 0.2; rmdir "$3/../lock""#;
    let gateway = scripted_gateway(dir.path(), script, 1);

    let mut ids = Vec::new();
    for kb in ["kb1", "kb2", "kb3"] {
        populate_input(gateway.knowledge_bases(), kb, &[("doc.txt", "hello")]).unwrap();
        ids.push(gateway.submit_index(&IndexRequest::new(kb)).unwrap());
    }

    for id in &ids {
        let status = wait_for_completion(gateway.registry(), id, Duration::from_secs(10)).await;
        assert_eq!(status, TaskStatus::Succeeded);
    }
}

/// Test: Shutdown cancels running jobs and records the cancellation.
#[tokio::test]
async fn test_shutdown_cancels_running_jobs() {
    let dir = TempDir::new().unwrap();
    let gateway = scripted_gateway(dir.path(), "echo started; sleep 30", 4);
    populate_input(gateway.knowledge_bases(), "kb1", &[("doc.txt", "hello")]).unwrap();

    let id = gateway.submit_index(&IndexRequest::new("kb1")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gateway.index_status(&id), TaskStatus::Running);

    tokio::time::timeout(Duration::from_secs(5), gateway.shutdown())
        .await
        .expect("shutdown should not wait for the sleeping process");

    assert_eq!(
        gateway.index_status(&id),
        TaskStatus::Failed("cancelled".to_string())
    );
}
