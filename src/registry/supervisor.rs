//! Supervised background jobs.
//!
//! [`JobSupervisor::submit`] registers a task and runs the job on its own
//! tokio task. A second, outer task awaits the job's `JoinHandle` and turns
//! whatever happened (success, failure, or a panic) into the single terminal
//! write for that task.

use async_trait::async_trait;
use std::time::Duration;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::TaskRegistry;
use crate::core::job::JobError;
use crate::core::types::TaskId;
use crate::execution::{
    Channel, CommandSpec, DiagnosticTail, JobRunner, LineSink, OutputLine, SinkClosed,
};

/// Forwards a background job's output to the log and the task's record.
///
/// Only the diagnostic tail is kept for the failure reason; primary lines
/// live on in the registry's bounded recent output.
struct TaskOutputSink {
    task_id: TaskId,
    registry: TaskRegistry,
    diagnostics: DiagnosticTail,
}

#[async_trait]
impl LineSink for TaskOutputSink {
    async fn accept(&mut self, line: OutputLine) -> Result<(), SinkClosed> {
        match line.channel {
            Channel::Primary => tracing::debug!(task_id = %self.task_id, "{}", line.text),
            Channel::Diagnostic => tracing::warn!(task_id = %self.task_id, "{}", line.text),
        }
        self.registry.append_output(&self.task_id, line.text.as_str());
        if line.channel == Channel::Diagnostic {
            self.diagnostics.push(line.text);
        }
        Ok(())
    }
}

/// Runs jobs in the background and records their outcome.
#[derive(Debug, Clone)]
pub struct JobSupervisor {
    registry: TaskRegistry,
    runner: JobRunner,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    /// Graceful shutdown timeout (default: 30 seconds).
    shutdown_timeout: Duration,
}

impl JobSupervisor {
    pub fn new(registry: TaskRegistry, runner: JobRunner) -> Self {
        Self {
            registry,
            runner,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    /// Set the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Number of jobs whose completion has not been recorded yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Register a task for `spec` and start it without waiting.
    pub fn submit(&self, label: impl Into<String>, spec: CommandSpec) -> TaskId {
        let label = label.into();
        let task_id = self.registry.create(label.as_str());
        tracing::info!(task_id = %task_id, label = %label, "submitted background job");

        let runner = self.runner.clone();
        let cancel = self.shutdown.child_token();
        let mut sink = TaskOutputSink {
            task_id,
            registry: self.registry.clone(),
            diagnostics: DiagnosticTail::default(),
        };

        let job = self.tracker.spawn(async move {
            let exit = runner.run_into(&spec, &mut sink, cancel).await?;
            sink.diagnostics.check_exit(exit)
        });

        let registry = self.registry.clone();
        self.tracker.spawn(async move {
            let outcome = settle(job.await);
            match &outcome {
                Ok(()) => tracing::info!(task_id = %task_id, "background job succeeded"),
                Err(reason) => {
                    tracing::warn!(task_id = %task_id, error = %reason, "background job failed")
                }
            }
            if let Err(e) = registry.complete(&task_id, outcome) {
                tracing::error!(task_id = %task_id, error = %e, "failed to record job outcome");
            }
        });

        task_id
    }

    /// Cancel every in-flight job and wait for their outcomes to be recorded.
    ///
    /// Cancelled jobs end as `Failed("cancelled")`. Jobs submitted after this
    /// call are cancelled immediately.
    pub async fn shutdown(&self) {
        let running = self.tracker.len();
        self.shutdown.cancel();
        self.tracker.close();

        if running == 0 {
            tracing::info!("No running jobs to wait for during shutdown");
            return;
        }

        tracing::info!(
            "Graceful shutdown: cancelling {} running job task(s) (timeout: {:?})",
            running,
            self.shutdown_timeout
        );
        if tokio::time::timeout(self.shutdown_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                "Graceful shutdown timeout ({:?}) exceeded with {} job task(s) still running",
                self.shutdown_timeout,
                self.tracker.len()
            );
        }
    }
}

/// Collapse a job task's result into the outcome stored in the registry.
fn settle(joined: Result<Result<(), JobError>, JoinError>) -> Result<(), String> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.reason()),
        Err(e) if e.is_panic() => Err(JobError::Internal("job task panicked".to_string()).reason()),
        Err(_) => Err(JobError::Cancelled.reason()),
    }
}
