//! Job execution engine.
//!
//! The `JobRunner` composes launcher, multiplexer and assembler for one job:
//! - Admission through a shared semaphore, held until the process is drained
//! - An optional per-job deadline
//! - Buffered or incremental delivery of the output

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::assembler::{BufferedResponse, EventStream, IncrementalResponse};
use super::command::CommandSpec;
use super::process::{ExitOutcome, launch};
use super::stream::{DrainOptions, LineSink, drain};
use crate::core::job::JobError;

/// Runs external programs under a concurrency limit and deadline.
///
/// Clones made with [`JobRunner::with_timeout`] share the same admission gate.
#[derive(Debug, Clone)]
pub struct JobRunner {
    /// Maximum number of processes in flight.
    max_concurrency: usize,
    /// Semaphore shared by every runner derived from this one.
    gate: Arc<Semaphore>,
    /// Deadline applied to each job.
    timeout: Option<Duration>,
}

impl JobRunner {
    /// Create a runner admitting at most `max_concurrency` processes at once.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            gate: Arc::new(Semaphore::new(max_concurrency)),
            timeout: None,
        }
    }

    /// A runner with a different deadline sharing this runner's gate.
    pub fn with_timeout(&self, timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Get the number of available permits (slots for concurrent execution).
    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn admit(&self) -> Result<OwnedSemaphorePermit, JobError> {
        self.gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| JobError::Internal("job admission gate is closed".to_string()))
    }

    fn options(&self, cancel: CancellationToken) -> DrainOptions {
        DrainOptions::new()
            .with_timeout(self.timeout)
            .with_cancel(cancel)
    }

    /// Launch `spec` and drain its output into `sink`.
    ///
    /// Waits for admission first. The exit outcome is returned whatever the
    /// code.
    pub async fn run_into(
        &self,
        spec: &CommandSpec,
        sink: &mut dyn LineSink,
        cancel: CancellationToken,
    ) -> Result<ExitOutcome, JobError> {
        let _permit = self.admit().await?;
        let handle = launch(spec)?;
        drain(handle, sink, &self.options(cancel)).await
    }

    /// Run `spec` to completion and return its primary output joined by `\n`.
    pub async fn run_buffered(
        &self,
        spec: &CommandSpec,
        cancel: CancellationToken,
    ) -> Result<String, JobError> {
        let mut response = BufferedResponse::new();
        let exit = self.run_into(spec, &mut response, cancel).await?;
        response.finish(exit)
    }

    /// Start `spec` and return a stream of its output events.
    ///
    /// Admission and launch happen before this returns, so a program that
    /// cannot be started is reported here rather than inside the stream.
    /// Dropping the returned stream kills the process.
    pub async fn run_incremental(&self, spec: &CommandSpec) -> Result<EventStream, JobError> {
        let permit = self.admit().await?;
        let handle = launch(spec)?;
        let options = self.options(CancellationToken::new());
        let (mut response, stream) = IncrementalResponse::channel();

        tokio::spawn(async move {
            let result = drain(handle, &mut response, &options).await;
            drop(permit);
            response.finish(result).await;
        });

        Ok(stream)
    }
}
