//! Job requests and the error taxonomy shared by every stage of a job.
//!
//! A job request is immutable input: it is validated once, turned into a
//! [`CommandSpec`](crate::execution::CommandSpec) and never consulted again.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while accepting or running a job.
#[derive(Debug, Error)]
pub enum JobError {
    /// Malformed or missing request fields.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A filesystem precondition is not met.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The knowledge base being initialised already exists.
    #[error("knowledge base '{0}' already exists")]
    AlreadyExists(String),

    /// The external program could not be started.
    #[error("failed to start '{program}': {reason}")]
    Spawn { program: String, reason: String },

    /// The external program ran and exited with a non-zero code.
    #[error("process exited with code {code}")]
    Process { code: i32, diagnostics: String },

    /// The job exceeded its deadline and the process was killed.
    #[error("timeout: process exceeded {0:?}")]
    Timeout(Duration),

    /// The job was cancelled before the process finished.
    #[error("cancelled")]
    Cancelled,

    /// Any other fault during orchestration.
    #[error("internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Human-readable failure reason recorded for a task.
    ///
    /// For a non-zero exit this is the diagnostic output itself, falling back
    /// to the exit code when the program wrote nothing to stderr.
    pub fn reason(&self) -> String {
        match self {
            JobError::Process { diagnostics, .. } if !diagnostics.trim().is_empty() => {
                diagnostics.trim().to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether the job was refused before any process was launched.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            JobError::Validation(_) | JobError::Precondition(_) | JobError::AlreadyExists(_)
        )
    }
}

/// The kind of `graphrag` invocation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Init,
    Index,
    Query,
}

impl JobKind {
    /// The `graphrag` subcommand for this kind of job.
    pub fn subcommand(&self) -> &'static str {
        match self {
            JobKind::Init => "init",
            JobKind::Index => "index",
            JobKind::Query => "query",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subcommand())
    }
}

/// Create a new knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitRequest {
    /// Knowledge base name, a directory under the KB root.
    pub root: String,
}

impl InitRequest {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    pub fn validate(&self) -> Result<(), JobError> {
        validate_kb_name(&self.root)
    }
}

/// Build (or rebuild) the index of a knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRequest {
    pub root: String,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub nocache: bool,
    /// Run identifier of an interrupted index run to resume.
    #[serde(default)]
    pub resume: Option<String>,
    #[serde(default = "default_reporter")]
    pub reporter: String,
    /// Artifact formats to emit, e.g. `parquet`, `csv`.
    #[serde(default = "default_emit")]
    pub emit: Vec<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub llm_model: Option<String>,
    #[serde(default)]
    pub llm_api_base: Option<String>,
    #[serde(default)]
    pub embed_model: Option<String>,
    #[serde(default)]
    pub embed_api_base: Option<String>,
}

fn default_reporter() -> String {
    "rich".to_string()
}

fn default_emit() -> Vec<String> {
    vec!["parquet".to_string()]
}

impl IndexRequest {
    /// Create a request with the default reporter and emitted artifacts.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            verbose: false,
            nocache: false,
            resume: None,
            reporter: default_reporter(),
            emit: default_emit(),
            api_key: None,
            llm_model: None,
            llm_api_base: None,
            embed_model: None,
            embed_api_base: None,
        }
    }

    pub fn validate(&self) -> Result<(), JobError> {
        validate_kb_name(&self.root)?;
        if self.reporter.trim().is_empty() {
            return Err(JobError::Validation("reporter must not be empty".to_string()));
        }
        if self.emit.is_empty() {
            return Err(JobError::Validation(
                "emit must name at least one artifact format".to_string(),
            ));
        }
        if let Some(bad) = self
            .emit
            .iter()
            .find(|kind| kind.trim().is_empty() || kind.contains(','))
        {
            return Err(JobError::Validation(format!(
                "invalid emit format: '{}'",
                bad
            )));
        }
        Ok(())
    }

    /// `settings.yaml` edits carried by this request, as dotted paths.
    pub fn settings_updates(&self) -> Vec<(&'static str, &str)> {
        [
            ("llm.model", &self.llm_model),
            ("llm.api_base", &self.llm_api_base),
            ("embeddings.llm.model", &self.embed_model),
            ("embeddings.llm.api_base", &self.embed_api_base),
        ]
        .into_iter()
        .filter_map(|(path, value)| value.as_deref().map(|v| (path, v)))
        .collect()
    }
}

/// Query an indexed knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub root: String,
    pub query: String,
    /// Search method understood by `graphrag`, e.g. `global` or `local`.
    pub method: String,
    /// Ask `graphrag` to stream its answer.
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub community_level: Option<u32>,
}

impl QueryRequest {
    pub fn new(
        root: impl Into<String>,
        query: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            query: query.into(),
            method: method.into(),
            streaming: false,
            community_level: None,
        }
    }

    pub fn validate(&self) -> Result<(), JobError> {
        validate_kb_name(&self.root)?;
        if self.query.trim().is_empty() {
            return Err(JobError::Validation("query must not be empty".to_string()));
        }
        if self.method.trim().is_empty() {
            return Err(JobError::Validation("query method must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Knowledge base names are a single directory component under the KB root.
pub fn validate_kb_name(name: &str) -> Result<(), JobError> {
    if name.trim().is_empty() {
        return Err(JobError::Validation(
            "knowledge base name is required".to_string(),
        ));
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(JobError::Validation(format!(
            "invalid knowledge base name: '{}'",
            name
        )));
    }
    Ok(())
}
