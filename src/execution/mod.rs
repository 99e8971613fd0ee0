//! Job execution.
//!
//! This module turns job requests into running external programs and their
//! output into results: command building, process launch, concurrent
//! draining of both output channels, and response assembly.

mod assembler;
mod command;
mod process;
mod runner;
mod stream;

pub use assembler::{
    BufferedResponse, DIAGNOSTIC_TAIL_LINES, DiagnosticTail, EventStream, IncrementalResponse,
    StreamEvent,
};
pub use command::{
    CommandSpec, CommandSpecBuilder, Program, index_command, init_command, query_command,
};
pub use process::{ExitOutcome, ProcessHandle, SIGNAL_EXIT_CODE, launch};
pub use runner::JobRunner;
pub use stream::{Channel, DrainOptions, LineSink, OutputLine, SinkClosed, drain};
