//! Turning a job's output lines into what the caller gets back.
//!
//! [`BufferedResponse`] collects everything and yields one result after the
//! process exits. [`IncrementalResponse`] forwards each primary line as a
//! [`StreamEvent::Delta`] the moment it is decoded and closes the stream with
//! an optional [`StreamEvent::Error`] and exactly one [`StreamEvent::Done`].
//!
//! Deltas are never held back: a consumer can receive every delta of a job
//! and only then learn that the job failed. The terminal events are the
//! authoritative outcome.

use async_trait::async_trait;
use futures::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::process::ExitOutcome;
use super::stream::{Channel, LineSink, OutputLine, SinkClosed};
use crate::core::job::JobError;

/// Number of diagnostic lines kept for the failure reason.
pub const DIAGNOSTIC_TAIL_LINES: usize = 200;

/// Capacity of the event queue between a streaming job and its consumer.
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/// Rolling window over the most recent diagnostic lines.
#[derive(Debug, Clone)]
pub struct DiagnosticTail {
    lines: VecDeque<String>,
    capacity: usize,
    dropped: usize,
}

impl Default for DiagnosticTail {
    fn default() -> Self {
        Self::with_capacity(DIAGNOSTIC_TAIL_LINES)
    }
}

impl DiagnosticTail {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(line);
    }

    /// Lines evicted from the front of the window so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// `Ok` for a zero exit, otherwise a process failure carrying this text.
    pub fn check_exit(&self, exit: ExitOutcome) -> Result<(), JobError> {
        if exit.success() {
            Ok(())
        } else {
            Err(process_failure(exit, self))
        }
    }

    /// Retained lines joined by `\n`.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(line);
        }
        out
    }
}

/// Failure for a non-zero exit, carrying the captured diagnostic text.
fn process_failure(exit: ExitOutcome, diagnostics: &DiagnosticTail) -> JobError {
    JobError::Process {
        code: exit.code,
        diagnostics: diagnostics.text(),
    }
}

/// Collects a job's output into a single result.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    primary: Vec<String>,
    diagnostics: DiagnosticTail,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> &DiagnosticTail {
        &self.diagnostics
    }

    /// Compose the result for a finished process.
    ///
    /// Exit 0 yields the primary lines joined by `\n`; any other code yields
    /// [`JobError::Process`] with the diagnostic text.
    pub fn finish(self, exit: ExitOutcome) -> Result<String, JobError> {
        if exit.success() {
            Ok(self.primary.join("\n"))
        } else {
            Err(process_failure(exit, &self.diagnostics))
        }
    }
}

#[async_trait]
impl LineSink for BufferedResponse {
    async fn accept(&mut self, line: OutputLine) -> Result<(), SinkClosed> {
        match line.channel {
            Channel::Primary => self.primary.push(line.text),
            Channel::Diagnostic => self.diagnostics.push(line.text),
        }
        Ok(())
    }
}

/// One event of an incremental response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One line of the answer.
    Delta(String),
    /// The job failed; the text is the failure reason.
    Error(String),
    /// End of the stream. Always the last event.
    Done,
}

/// Forwards primary lines to a consumer as they arrive.
#[derive(Debug)]
pub struct IncrementalResponse {
    tx: mpsc::Sender<StreamEvent>,
    diagnostics: DiagnosticTail,
}

impl IncrementalResponse {
    /// Create a response together with the stream its consumer reads.
    pub fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        (
            Self {
                tx,
                diagnostics: DiagnosticTail::default(),
            },
            EventStream { rx },
        )
    }

    /// Emit the terminal events for a finished (or failed) job.
    ///
    /// Non-zero exits and failures produce `Error` then `Done`; success
    /// produces `Done`. Cancellation emits nothing, since the consumer is gone
    /// or being shut down.
    pub async fn finish(self, result: Result<ExitOutcome, JobError>) {
        let failure = match result {
            Ok(exit) if exit.success() => None,
            Ok(exit) => Some(process_failure(exit, &self.diagnostics)),
            Err(JobError::Cancelled) => return,
            Err(e) => Some(e),
        };

        if let Some(err) = failure {
            if self.tx.send(StreamEvent::Error(err.reason())).await.is_err() {
                return;
            }
        }
        let _ = self.tx.send(StreamEvent::Done).await;
    }
}

#[async_trait]
impl LineSink for IncrementalResponse {
    async fn accept(&mut self, line: OutputLine) -> Result<(), SinkClosed> {
        match line.channel {
            Channel::Primary => self
                .tx
                .send(StreamEvent::Delta(line.text))
                .await
                .map_err(|_| SinkClosed),
            Channel::Diagnostic => {
                self.diagnostics.push(line.text);
                Ok(())
            }
        }
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

/// The consumer side of an incremental response.
///
/// Dropping it signals the job to stop and kills the process.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
}

impl EventStream {
    /// Receive the next event, or `None` once the job has let go.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
