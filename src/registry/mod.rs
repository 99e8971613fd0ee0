//! Lifecycle tracking for background jobs.
//!
//! The [`TaskRegistry`] is a process-wide map from [`TaskId`] to a
//! [`TaskRecord`]. It is volatile: records live until the process exits.
//! Every record starts `Running` and moves to a terminal status exactly once;
//! [`TaskRegistry::complete`] refuses a second transition.

mod supervisor;

pub use supervisor::JobSupervisor;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;

use crate::core::types::TaskId;

/// Number of output lines retained per task.
pub const RECENT_OUTPUT_LINES: usize = 100;

/// Errors from registry writes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No task with this id was ever created.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The task already has a terminal status.
    #[error("task {0} has already finished")]
    AlreadyTerminal(TaskId),
}

/// Status of a task as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// The job is still running.
    Running,
    /// The job's process exited with code 0.
    Succeeded,
    /// The job failed; carries the reason.
    Failed(String),
    /// No task with the requested id exists.
    Unknown,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed(_))
    }

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed(_) => "failed",
            TaskStatus::Unknown => "unknown",
        }
    }

    /// Failure reason, if the task failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            TaskStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Everything the registry knows about one task.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// What the task is doing, e.g. `index kb1`.
    pub label: String,
    pub status: TaskStatus,
    pub started_at: SystemTime,
    pub ended_at: Option<SystemTime>,
    pub duration: Option<Duration>,
    started: Instant,
    recent_output: VecDeque<String>,
}

impl TaskRecord {
    fn new(label: String) -> Self {
        Self {
            label,
            status: TaskStatus::Running,
            started_at: SystemTime::now(),
            ended_at: None,
            duration: None,
            started: Instant::now(),
            recent_output: VecDeque::new(),
        }
    }
}

/// Point-in-time copy of a task record.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub label: String,
    pub status: TaskStatus,
    pub started_at: SystemTime,
    pub ended_at: Option<SystemTime>,
    pub duration: Option<Duration>,
    /// The most recent output lines, oldest first.
    pub recent_output: Vec<String>,
}

/// Shared, thread-safe task table.
///
/// Cloning is cheap and every clone sees the same tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<TaskId, TaskRecord>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Writers only assign whole fields, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new running task and return its id.
    pub fn create(&self, label: impl Into<String>) -> TaskId {
        let id = TaskId::new();
        self.write().insert(id, TaskRecord::new(label.into()));
        id
    }

    /// Current status; [`TaskStatus::Unknown`] for ids never created.
    pub fn status(&self, id: &TaskId) -> TaskStatus {
        self.read()
            .get(id)
            .map(|record| record.status.clone())
            .unwrap_or(TaskStatus::Unknown)
    }

    pub fn snapshot(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.read().get(id).map(|record| TaskSnapshot {
            id: *id,
            label: record.label.clone(),
            status: record.status.clone(),
            started_at: record.started_at,
            ended_at: record.ended_at,
            duration: record.duration,
            recent_output: record.recent_output.iter().cloned().collect(),
        })
    }

    /// Record one line of output for a running task.
    ///
    /// Ignored for unknown or finished tasks. Only the last
    /// [`RECENT_OUTPUT_LINES`] lines are kept.
    pub fn append_output(&self, id: &TaskId, line: impl Into<String>) {
        let mut tasks = self.write();
        if let Some(record) = tasks.get_mut(id) {
            if record.status != TaskStatus::Running {
                return;
            }
            if record.recent_output.len() == RECENT_OUTPUT_LINES {
                record.recent_output.pop_front();
            }
            record.recent_output.push_back(line.into());
        }
    }

    /// Move a running task to its terminal status.
    pub fn complete(&self, id: &TaskId, outcome: Result<(), String>) -> Result<(), RegistryError> {
        let mut tasks = self.write();
        let record = tasks.get_mut(id).ok_or(RegistryError::NotFound(*id))?;

        if record.status.is_terminal() {
            return Err(RegistryError::AlreadyTerminal(*id));
        }

        record.status = match outcome {
            Ok(()) => TaskStatus::Succeeded,
            Err(reason) => TaskStatus::Failed(reason),
        };
        record.ended_at = Some(SystemTime::now());
        record.duration = Some(record.started.elapsed());
        Ok(())
    }

    /// Number of tasks ever created.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
