//! Command descriptors and the builders that produce them from job requests.
//!
//! A [`CommandSpec`] is the immutable description of one external program
//! invocation: executable, ordered arguments, environment overrides and an
//! optional working directory. The functions at the bottom of this module
//! translate validated job requests into the `graphrag` argument layout:
//!
//! ```text
//! <executable> <leading args...> <subcommand> <flags...>
//! ```
//!
//! ```rust
//! use graphgate::core::job::IndexRequest;
//! use graphgate::execution::{Program, index_command};
//! use std::path::Path;
//!
//! let mut req = IndexRequest::new("kb1");
//! req.emit = vec!["parquet".into(), "csv".into()];
//!
//! let spec = index_command(&Program::default(), Path::new("/kbs/kb1"), &req);
//! assert_eq!(spec.program(), "graphrag");
//! assert_eq!(
//!     spec.args(),
//!     &["index", "--root", "/kbs/kb1", "--reporter", "rich", "--emit", "parquet,csv"]
//! );
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::core::environment::Environment;
use crate::core::job::{IndexRequest, JobKind, QueryRequest};

/// How the knowledge-graph executable is invoked.
///
/// `args` are placed before the subcommand, which allows launchers such as
/// `python -m graphrag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Program {
    pub executable: String,
    pub args: Vec<String>,
    pub environment: Environment,
}

impl Default for Program {
    fn default() -> Self {
        Self::new("graphrag")
    }
}

impl Program {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            environment: Environment::default(),
        }
    }

    /// Builder: set the arguments placed before the subcommand.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: add an environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.set(key, value);
        self
    }

    /// Start a command for the given job kind.
    fn command(&self, kind: JobKind) -> CommandSpecBuilder {
        CommandSpec::builder(&self.executable)
            .args(&self.args)
            .arg(kind.subcommand())
            .environment(self.environment.clone())
    }
}

/// Description of a single external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute
    program: String,
    /// Command arguments
    args: Vec<String>,
    /// Environment overrides
    environment: Environment,
    /// Working directory
    working_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Create a new builder for a command.
    pub fn builder(program: impl Into<String>) -> CommandSpecBuilder {
        CommandSpecBuilder::new(program)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }
}

/// Renders the command line for logs. Arguments containing whitespace are
/// single-quoted; this is not meant to be re-parsed by a shell.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Builder for creating `CommandSpec` instances.
#[derive(Debug, Clone)]
pub struct CommandSpecBuilder {
    program: String,
    args: Vec<String>,
    environment: Environment,
    working_dir: Option<PathBuf>,
}

impl CommandSpecBuilder {
    /// Create a new builder with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            environment: Environment::default(),
            working_dir: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a flag followed by its value.
    pub fn flag(self, name: &str, value: impl Into<String>) -> Self {
        self.arg(name).arg(value)
    }

    /// Add a flag and value only when the value is present.
    pub fn flag_opt<V: Into<String>>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.flag(name, value),
            None => self,
        }
    }

    /// Add a bare switch only when `enabled` is set.
    pub fn switch(self, name: &str, enabled: bool) -> Self {
        if enabled { self.arg(name) } else { self }
    }

    /// Set environment variables.
    pub fn environment(mut self, env: Environment) -> Self {
        self.environment = env;
        self
    }

    /// Add a single environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.set(key, value);
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Build the `CommandSpec`.
    pub fn build(self) -> CommandSpec {
        CommandSpec {
            program: self.program,
            args: self.args,
            environment: self.environment,
            working_dir: self.working_dir,
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `graphrag init --root <kb>`
pub fn init_command(program: &Program, kb_dir: &Path) -> CommandSpec {
    program
        .command(JobKind::Init)
        .flag("--root", path_arg(kb_dir))
        .build()
}

/// `graphrag index --root <kb> [--verbose] [--nocache] [--resume <id>] --reporter <r> --emit <a,b>`
///
/// An empty resume token counts as absent.
pub fn index_command(program: &Program, kb_dir: &Path, req: &IndexRequest) -> CommandSpec {
    let resume = req.resume.as_deref().filter(|token| !token.is_empty());

    program
        .command(JobKind::Index)
        .flag("--root", path_arg(kb_dir))
        .switch("--verbose", req.verbose)
        .switch("--nocache", req.nocache)
        .flag_opt("--resume", resume)
        .flag("--reporter", req.reporter.as_str())
        .flag("--emit", req.emit.join(","))
        .build()
}

/// `graphrag query --root <kb> --query <text> --data <kb>/output --method <m> [--streaming] [--community-level <n>]`
pub fn query_command(program: &Program, kb_dir: &Path, req: &QueryRequest) -> CommandSpec {
    program
        .command(JobKind::Query)
        .flag("--root", path_arg(kb_dir))
        .flag("--query", req.query.as_str())
        .flag("--data", path_arg(&kb_dir.join("output")))
        .flag("--method", req.method.as_str())
        .switch("--streaming", req.streaming)
        .flag_opt("--community-level", req.community_level.map(|l| l.to_string()))
        .build()
}
