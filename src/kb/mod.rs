//! Knowledge base directory layout.
//!
//! Every knowledge base is a directory under a common root:
//!
//! ```text
//! <kb_root>/<name>/
//!     input/          source documents for indexing
//!     output/         index artifacts written by graphrag
//!     .env            written by `graphrag init`
//!     settings.yaml   written by `graphrag init`
//! ```

pub mod settings;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::job::{JobError, validate_kb_name};

/// Access to the knowledge bases under one root directory.
#[derive(Debug, Clone)]
pub struct KnowledgeBases {
    root: PathBuf,
}

impl KnowledgeBases {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if it does not exist yet.
    pub fn ensure_root(&self) -> io::Result<()> {
        if !self.root.exists() {
            tracing::info!(path = %self.root.display(), "creating knowledge base root");
        }
        fs::create_dir_all(&self.root)
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn input_dir(&self, name: &str) -> PathBuf {
        self.path(name).join("input")
    }

    pub fn output_dir(&self, name: &str) -> PathBuf {
        self.path(name).join("output")
    }

    pub fn env_file(&self, name: &str) -> PathBuf {
        self.path(name).join(".env")
    }

    pub fn settings_file(&self, name: &str) -> PathBuf {
        self.path(name).join("settings.yaml")
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_dir()
    }

    /// Create `<name>/input`. Fails with `AlreadyExists` if `<name>` exists.
    pub fn create(&self, name: &str) -> Result<PathBuf, JobError> {
        validate_kb_name(name)?;
        let kb_dir = self.path(name);

        fs::create_dir_all(&self.root).map_err(|e| internal(&self.root, e))?;
        match fs::create_dir(&kb_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(JobError::AlreadyExists(name.to_string()));
            }
            Err(e) => return Err(internal(&kb_dir, e)),
        }

        let input = self.input_dir(name);
        fs::create_dir(&input).map_err(|e| internal(&input, e))?;
        Ok(kb_dir)
    }

    /// An index run needs a non-empty `<name>/input` directory.
    pub fn check_index_input(&self, name: &str) -> Result<(), JobError> {
        let input = self.input_dir(name);
        if !input.is_dir() {
            return Err(JobError::Precondition(format!(
                "input directory '{}' does not exist",
                input.display()
            )));
        }
        let mut entries = fs::read_dir(&input).map_err(|e| internal(&input, e))?;
        if entries.next().is_none() {
            return Err(JobError::Precondition(format!(
                "input directory '{}' is empty",
                input.display()
            )));
        }
        Ok(())
    }

    /// The query precondition: the knowledge base directory must exist.
    pub fn check_exists(&self, name: &str) -> Result<(), JobError> {
        if self.exists(name) {
            Ok(())
        } else {
            Err(JobError::Precondition(format!(
                "knowledge base '{}' does not exist",
                name
            )))
        }
    }

    /// Names of all knowledge bases, sorted.
    pub fn list(&self) -> io::Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        sorted_names(&self.root, |ft| ft.is_dir())
    }

    /// Write an uploaded document into `<name>/input`, replacing any file of
    /// the same name.
    ///
    /// Only `.txt` files are accepted, and the input directory must already
    /// exist.
    pub fn save_input_file(
        &self,
        name: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<PathBuf, JobError> {
        validate_kb_name(name)?;
        validate_upload_name(filename)?;

        let input = self.input_dir(name);
        if !input.is_dir() {
            return Err(JobError::Precondition(format!(
                "input directory '{}' does not exist",
                input.display()
            )));
        }
        let target = input.join(filename);
        fs::write(&target, content).map_err(|e| internal(&target, e))?;
        Ok(target)
    }

    /// Names of the files in `<name>/input`, sorted.
    ///
    /// Returns `Ok(None)` when the knowledge base has no input directory.
    pub fn list_input_files(&self, name: &str) -> Result<Option<Vec<String>>, JobError> {
        validate_kb_name(name)?;
        let input = self.input_dir(name);
        if !input.is_dir() {
            return Ok(None);
        }
        sorted_names(&input, |ft| ft.is_file())
            .map(Some)
            .map_err(|e| internal(&input, e))
    }
}

/// Uploaded documents must be plain-text files named by a single component.
fn validate_upload_name(filename: &str) -> Result<(), JobError> {
    if filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\', '\0'])
    {
        return Err(JobError::Validation(format!(
            "invalid file name: '{}'",
            filename
        )));
    }
    if !filename.to_ascii_lowercase().ends_with(".txt") {
        return Err(JobError::Validation(format!(
            "only .txt files can be uploaded, got '{}'",
            filename
        )));
    }
    Ok(())
}

fn sorted_names(dir: &Path, keep: impl Fn(&fs::FileType) -> bool) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if keep(&entry.file_type()?) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn internal(path: &Path, e: io::Error) -> JobError {
    JobError::Internal(format!("{}: {}", path.display(), e))
}
