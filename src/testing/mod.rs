//! Testing utilities for users of the graphgate library.
//!
//! This module provides helpers for exercising the gateway without a real
//! `graphrag` installation:
//!
//! - [`scripted_program`]: a [`Program`] that runs a shell script instead
//! - [`populate_input`]: create a knowledge base with input documents
//! - [`TestHarness`]: a gateway over a scripted program with polling helpers

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::GatewayConfig;
use crate::core::job::{IndexRequest, JobError};
use crate::core::types::TaskId;
use crate::execution::Program;
use crate::gateway::Gateway;
use crate::kb::KnowledgeBases;
use crate::registry::{TaskRegistry, TaskStatus};

/// A program that runs `script` with `sh -c` in place of `graphrag`.
///
/// The generated command line is passed to the script as positional
/// parameters, so `$1` is the subcommand (`init`, `index` or `query`) and
/// `$3` is the knowledge base directory.
///
/// # Example
///
/// ```
/// use graphgate::execution::init_command;
/// use graphgate::testing::scripted_program;
/// use std::path::Path;
///
/// let program = scripted_program("echo \"running $1\"");
/// let spec = init_command(&program, Path::new("/kbs/kb1"));
///
/// assert_eq!(spec.program(), "sh");
/// assert_eq!(spec.args()[2..], ["graphrag", "init", "--root", "/kbs/kb1"]);
/// ```
pub fn scripted_program(script: &str) -> Program {
    Program::new("sh").with_args(["-c", script, "graphrag"])
}

/// Create knowledge base `name` (if needed) and write `files` into its input
/// directory.
pub fn populate_input(
    kbs: &KnowledgeBases,
    name: &str,
    files: &[(&str, &str)],
) -> io::Result<()> {
    let input = kbs.input_dir(name);
    fs::create_dir_all(&input)?;
    for (file, content) in files {
        fs::write(input.join(file), content)?;
    }
    Ok(())
}

/// Poll `registry` until `id` reaches a terminal status or `timeout` elapses.
///
/// Returns the last observed status, which is `Running` on timeout.
pub async fn wait_for_terminal_status(
    registry: &TaskRegistry,
    id: &TaskId,
    timeout: Duration,
) -> TaskStatus {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = registry.status(id);
        if status.is_terminal() || tokio::time::Instant::now() >= deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A gateway wired to a scripted program.
///
/// Provides:
/// - Configurable concurrency and deadlines
/// - Knowledge base setup
/// - Index submission with assertions on the terminal status
///
/// # Example
///
/// ```ignore
/// use graphgate::testing::TestHarness;
///
/// let harness = TestHarness::new(tmp.path(), "echo indexed")
///     .with_concurrency(2);
/// harness.populate("kb1", &[("doc.txt", "hello")])?;
///
/// let id = harness.index_and_assert_success("kb1").await;
/// ```
pub struct TestHarness {
    config: GatewayConfig,
    gateway: Gateway,
}

impl TestHarness {
    /// Create a harness whose knowledge bases live under `kb_root`.
    pub fn new(kb_root: impl Into<PathBuf>, script: &str) -> Self {
        let config = GatewayConfig {
            kb_root: kb_root.into(),
            program: scripted_program(script),
            ..GatewayConfig::default()
        };
        let gateway = Gateway::new(&config);
        Self { config, gateway }
    }

    fn rebuild(mut self) -> Self {
        self.gateway = Gateway::new(&self.config);
        self
    }

    /// Set the maximum number of concurrent processes.
    pub fn with_concurrency(mut self, max_concurrent_jobs: usize) -> Self {
        self.config.limits.max_concurrent_jobs = max_concurrent_jobs;
        self.rebuild()
    }

    /// Set the deadline for index jobs, rounded to whole seconds.
    pub fn with_index_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.limits.index_timeout_secs = timeout.map(|t| t.as_secs().max(1));
        self.rebuild()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Create knowledge base `name` with the given input documents.
    pub fn populate(&self, name: &str, files: &[(&str, &str)]) -> io::Result<()> {
        populate_input(self.gateway.knowledge_bases(), name, files)
    }

    /// Submit an index job for `name` and wait up to 10 seconds for it.
    pub async fn index(&self, name: &str) -> Result<(TaskId, TaskStatus), JobError> {
        let id = self.gateway.submit_index(&IndexRequest::new(name))?;
        let status =
            wait_for_terminal_status(self.gateway.registry(), &id, Duration::from_secs(10)).await;
        Ok((id, status))
    }

    /// Index `name` and assert that the job succeeded.
    pub async fn index_and_assert_success(&self, name: &str) -> TaskId {
        match self.index(name).await {
            Ok((id, TaskStatus::Succeeded)) => id,
            Ok((id, status)) => panic!("Expected task {} to succeed, got {:?}", id, status),
            Err(e) => panic!("Expected index job to be accepted, got {}", e),
        }
    }

    /// Index `name` and assert that the job failed; returns the reason.
    pub async fn index_and_assert_failure(&self, name: &str) -> String {
        match self.index(name).await {
            Ok((_, TaskStatus::Failed(reason))) => reason,
            Ok((id, status)) => panic!("Expected task {} to fail, got {:?}", id, status),
            Err(e) => panic!("Expected index job to be accepted, got {}", e),
        }
    }
}
