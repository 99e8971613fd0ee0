//! Concurrent draining of a process's two output channels.
//!
//! Each pipe gets its own reader task; both feed one bounded queue that
//! [`drain`] forwards to a [`LineSink`]. A program that floods stderr while
//! the caller is only interested in stdout therefore never stalls on a full
//! pipe buffer. Lines from the same channel keep their order; interleaving
//! across channels follows arrival at the queue and is not guaranteed.
//!
//! While draining, the loop also watches three ways to stop early:
//!
//! - the caller's [`CancellationToken`],
//! - the sink reporting that its consumer went away ([`LineSink::closed`]),
//! - the optional deadline in [`DrainOptions`].
//!
//! The deadline and the token are also watched while a slow sink is applying
//! backpressure. Any of these kills the child before returning.

use async_trait::async_trait;
use std::future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use super::process::{ExitOutcome, ProcessHandle};
use crate::core::job::JobError;

/// Capacity of the queue between the pipe readers and the sink.
const LINE_QUEUE_CAPACITY: usize = 256;

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Standard output.
    Primary,
    /// Standard error.
    Diagnostic,
}

/// One decoded line of process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub channel: Channel,
    /// Arrival order within `channel`, starting at 0.
    pub seq: u64,
    pub text: String,
}

/// Returned by a sink whose consumer is no longer listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Destination for drained output lines.
#[async_trait]
pub trait LineSink: Send + Sync {
    /// Accept one line. Awaiting here applies backpressure to the drain.
    async fn accept(&mut self, line: OutputLine) -> Result<(), SinkClosed>;

    /// Resolves once the consumer behind this sink has gone away.
    ///
    /// The default never resolves.
    async fn closed(&self) {
        future::pending::<()>().await
    }
}

/// Limits applied while draining a process.
#[derive(Debug, Clone, Default)]
pub struct DrainOptions {
    /// Kill the process if it has not finished within this duration.
    pub timeout: Option<Duration>,
    /// Kill the process when this token is cancelled.
    pub cancel: CancellationToken,
}

impl DrainOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

type QueueItem = io::Result<OutputLine>;

/// Drain both channels of `handle` into `sink`, then wait for the exit code.
///
/// On success the exit outcome is returned whatever the code; interpreting a
/// non-zero code is up to the caller. On timeout, cancellation, a closed
/// sink or a read error the process is killed and an error is returned.
pub async fn drain(
    mut handle: ProcessHandle,
    sink: &mut dyn LineSink,
    options: &DrainOptions,
) -> Result<ExitOutcome, JobError> {
    let (tx, mut rx) = mpsc::channel::<QueueItem>(LINE_QUEUE_CAPACITY);
    let (stdout, stderr) = handle.take_output();

    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = stdout {
        readers.push(spawn_reader(stdout, Channel::Primary, tx.clone()));
    }
    if let Some(stderr) = stderr {
        readers.push(spawn_reader(stderr, Channel::Diagnostic, tx.clone()));
    }
    // The queue closes once every reader has hit end-of-stream.
    drop(tx);

    let deadline = options.timeout.map(|t| (Instant::now() + t, t));

    let drained: Result<(), JobError> = loop {
        tokio::select! {
            biased;

            err = interrupted(options, deadline) => break Err(err),
            _ = sink.closed() => break Err(JobError::Cancelled),
            item = rx.recv() => match item {
                Some(Ok(line)) => {
                    // A sink applying backpressure must not hold off the
                    // deadline or cancellation.
                    let accepted = tokio::select! {
                        biased;

                        err = interrupted(options, deadline) => Err(err),
                        sent = sink.accept(line) => sent.map_err(|_| JobError::Cancelled),
                    };
                    if let Err(e) = accepted {
                        break Err(e);
                    }
                }
                Some(Err(e)) => {
                    break Err(JobError::Internal(format!(
                        "failed to read output of '{}': {}",
                        handle.program(),
                        e
                    )));
                }
                None => break Ok(()),
            },
        }
    };

    let result = match drained {
        Ok(()) => tokio::select! {
            biased;

            err = interrupted(options, deadline) => Err(err),
            _ = sink.closed() => Err(JobError::Cancelled),
            exit = handle.wait() => exit.map_err(|e| {
                JobError::Internal(format!("failed to wait for '{}': {}", handle.program(), e))
            }),
        },
        Err(e) => Err(e),
    };

    if let Err(ref err) = result {
        for reader in &readers {
            reader.abort();
        }
        tracing::warn!(
            program = %handle.program(),
            pid = ?handle.pid(),
            reason = %err,
            "terminating process"
        );
        if let Err(e) = handle.kill().await {
            tracing::warn!(program = %handle.program(), error = %e, "failed to kill process");
        }
    }

    result
}

/// Resolves with the reason once the caller cancels or the deadline passes.
async fn interrupted(options: &DrainOptions, deadline: Option<(Instant, Duration)>) -> JobError {
    tokio::select! {
        biased;

        _ = options.cancel.cancelled() => JobError::Cancelled,
        _ = deadline_elapsed(deadline) => timeout_error(deadline),
    }
}

async fn deadline_elapsed(deadline: Option<(Instant, Duration)>) {
    match deadline {
        Some((at, _)) => sleep_until(at).await,
        None => future::pending::<()>().await,
    }
}

fn timeout_error(deadline: Option<(Instant, Duration)>) -> JobError {
    JobError::Timeout(deadline.map(|(_, t)| t).unwrap_or_default())
}

fn spawn_reader<R>(reader: R, channel: Channel, tx: mpsc::Sender<QueueItem>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut seq = 0u64;

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = OutputLine {
                        channel,
                        seq,
                        text: decode_line(&buf),
                    };
                    if tx.send(Ok(line)).await.is_err() {
                        break;
                    }
                    seq += 1;
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    })
}

/// Lossy UTF-8 decode with the line terminator removed.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
