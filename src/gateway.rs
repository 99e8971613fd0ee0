//! Service facade shared by the HTTP API and the CLI.
//!
//! The [`Gateway`] validates job requests, enforces the filesystem
//! preconditions of each job kind, applies settings overrides, builds the
//! `graphrag` command and hands it to the runner or the supervisor.

use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::core::job::{IndexRequest, InitRequest, JobError, JobKind, QueryRequest};
use crate::core::types::TaskId;
use crate::execution::{
    EventStream, JobRunner, Program, index_command, init_command, query_command,
};
use crate::kb::KnowledgeBases;
use crate::kb::settings::{SettingsError, update_env_file, update_yaml_config};
use crate::registry::{JobSupervisor, TaskRegistry, TaskSnapshot, TaskStatus};

/// Environment key the API key override is written to.
pub const API_KEY_ENV: &str = "GRAPHRAG_API_KEY";

/// Entry point for every job the service runs.
#[derive(Debug, Clone)]
pub struct Gateway {
    kbs: KnowledgeBases,
    program: Program,
    /// Runner for synchronous jobs (init, query).
    runner: JobRunner,
    /// Background driver for index jobs.
    supervisor: JobSupervisor,
}

impl Gateway {
    /// Build a gateway from configuration.
    ///
    /// All job kinds share one admission gate of `max_concurrent_jobs`.
    pub fn new(config: &GatewayConfig) -> Self {
        let limits = &config.limits;
        let gate = JobRunner::new(limits.max_concurrent_jobs);
        let supervisor = JobSupervisor::new(
            TaskRegistry::new(),
            gate.with_timeout(limits.index_timeout()),
        );

        Self {
            kbs: KnowledgeBases::new(&config.kb_root),
            program: config.program.clone(),
            runner: gate.with_timeout(limits.query_timeout()),
            supervisor,
        }
    }

    pub fn knowledge_bases(&self) -> &KnowledgeBases {
        &self.kbs
    }

    pub fn registry(&self) -> &TaskRegistry {
        self.supervisor.registry()
    }

    /// Create a knowledge base and run `graphrag init` in it.
    pub async fn init(&self, req: &InitRequest) -> Result<(), JobError> {
        req.validate()?;
        let kb_dir = self.kbs.create(&req.root)?;
        tracing::info!(kb = %req.root, "initialising knowledge base");

        let spec = init_command(&self.program, &kb_dir);
        self.runner.run_buffered(&spec, CancellationToken::new()).await?;
        Ok(())
    }

    /// Start an index job in the background and return its task id.
    ///
    /// Validation, the input-directory precondition and settings overrides
    /// are applied before returning; no task is created if any of them fail.
    pub fn submit_index(&self, req: &IndexRequest) -> Result<TaskId, JobError> {
        req.validate()?;
        self.kbs.check_index_input(&req.root)?;
        self.apply_settings(req)?;

        let spec = index_command(&self.program, &self.kbs.path(&req.root), req);
        let label = format!("{} {}", JobKind::Index, req.root);
        Ok(self.supervisor.submit(label, spec))
    }

    fn apply_settings(&self, req: &IndexRequest) -> Result<(), JobError> {
        if let Some(key) = req.api_key.as_deref() {
            let env_file = self.kbs.env_file(&req.root);
            update_env_file(&env_file, API_KEY_ENV, key).map_err(settings_error)?;
            tracing::info!(kb = %req.root, "updated API key in .env");
        }

        let updates = req.settings_updates();
        if !updates.is_empty() {
            update_yaml_config(&self.kbs.settings_file(&req.root), &updates)
                .map_err(settings_error)?;
            tracing::info!(
                kb = %req.root,
                keys = ?updates.iter().map(|(path, _)| *path).collect::<Vec<_>>(),
                "updated settings.yaml"
            );
        }
        Ok(())
    }

    pub fn index_status(&self, id: &TaskId) -> TaskStatus {
        self.registry().status(id)
    }

    pub fn index_snapshot(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.registry().snapshot(id)
    }

    /// Run a query to completion and return the answer.
    pub async fn query(&self, req: &QueryRequest) -> Result<String, JobError> {
        req.validate()?;
        self.kbs.check_exists(&req.root)?;

        let spec = query_command(&self.program, &self.kbs.path(&req.root), req);
        self.runner.run_buffered(&spec, CancellationToken::new()).await
    }

    /// Run a query with `--streaming` and return its events as they arrive.
    pub async fn query_stream(&self, req: &QueryRequest) -> Result<EventStream, JobError> {
        req.validate()?;
        self.kbs.check_exists(&req.root)?;

        let mut req = req.clone();
        req.streaming = true;
        let spec = query_command(&self.program, &self.kbs.path(&req.root), &req);
        self.runner.run_incremental(&spec).await
    }

    pub fn list_knowledge_bases(&self) -> Result<Vec<String>, JobError> {
        self.kbs
            .list()
            .map_err(|e| JobError::Internal(format!("failed to list knowledge bases: {}", e)))
    }

    /// Store an uploaded document in a knowledge base's input directory.
    pub fn upload_input_file(
        &self,
        name: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<(), JobError> {
        let path = self.kbs.save_input_file(name, filename, content)?;
        tracing::info!(kb = %name, path = %path.display(), bytes = content.len(), "stored upload");
        Ok(())
    }

    /// Files uploaded to a knowledge base, or `None` if it has no input dir.
    pub fn list_input_files(&self, name: &str) -> Result<Option<Vec<String>>, JobError> {
        self.kbs.list_input_files(name)
    }

    /// Cancel background jobs and wait for their outcomes to be recorded.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}

fn settings_error(err: SettingsError) -> JobError {
    match err {
        SettingsError::EnvFileMissing(path) => JobError::Precondition(format!(
            "environment file '{}' not found",
            path.display()
        )),
        other => JobError::Internal(other.to_string()),
    }
}
