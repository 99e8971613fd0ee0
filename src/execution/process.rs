//! Spawning external programs.
//!
//! [`launch`] turns a [`CommandSpec`] into a running child process and hands
//! back a [`ProcessHandle`] owning both output pipes and the exit status.
//! Launching never waits for the program; a non-zero exit code is reported as
//! data by [`ProcessHandle::wait`], not as an error.

use std::io;
use std::process::Stdio;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use super::command::CommandSpec;
use crate::core::job::JobError;

/// Exit code reported when the process was terminated by a signal.
pub const SIGNAL_EXIT_CODE: i32 = -1;

/// How a process finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: i32,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// A running external program.
///
/// The child is killed if the handle is dropped before it has been waited on.
#[derive(Debug)]
pub struct ProcessHandle {
    program: String,
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ProcessHandle {
    /// Program name, for logs and error messages.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// OS process id, if the process has not been reaped yet.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Take ownership of the primary (stdout) and diagnostic (stderr) pipes.
    ///
    /// Returns `None` for a pipe that was already taken.
    pub fn take_output(&mut self) -> (Option<ChildStdout>, Option<ChildStderr>) {
        (self.stdout.take(), self.stderr.take())
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> io::Result<ExitOutcome> {
        let status = self.child.wait().await?;
        Ok(ExitOutcome {
            code: status.code().unwrap_or(SIGNAL_EXIT_CODE),
        })
    }

    /// Force-terminate the process and reap it.
    pub async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}

/// Spawn the program described by `spec` with piped stdout and stderr.
pub fn launch(spec: &CommandSpec) -> Result<ProcessHandle, JobError> {
    let spawn_error = |reason: String| JobError::Spawn {
        program: spec.program().to_string(),
        reason,
    };

    let mut cmd = Command::new(spec.program());
    cmd.args(spec.args());

    for (key, value) in spec.environment().iter() {
        cmd.env(key, value);
    }

    // Checked up front: spawn reports a missing cwd as NotFound, which would
    // otherwise read as a missing binary.
    if let Some(dir) = spec.working_dir() {
        if !dir.is_dir() {
            return Err(spawn_error(format!(
                "working directory '{}' does not exist",
                dir.display()
            )));
        }
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| spawn_error(describe_spawn_error(&e)))?;

    tracing::info!(
        program = %spec.program(),
        pid = ?child.id(),
        command = %spec,
        env = ?spec.environment().keys().collect::<Vec<_>>(),
        "launched process"
    );

    Ok(ProcessHandle {
        program: spec.program().to_string(),
        stdout: child.stdout.take(),
        stderr: child.stderr.take(),
        child,
    })
}

fn describe_spawn_error(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "program not found".to_string(),
        io::ErrorKind::PermissionDenied => "permission denied".to_string(),
        _ => err.to_string(),
    }
}
