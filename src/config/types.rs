//! Configuration type definitions.
//!
//! Every field has a default, so an empty document (or no file at all) is a
//! valid configuration:
//!
//! ```yaml
//! kb_root: ./kbs
//! server:
//!   host: 127.0.0.1
//!   port: 8012
//! program:
//!   executable: graphrag
//!   args: []
//!   environment: {}
//! limits:
//!   max_concurrent_jobs: 4
//!   index_timeout_secs: 21600
//!   query_timeout_secs: 600
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::execution::Program;

/// Gateway configuration (graphgate.yaml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Directory holding one subdirectory per knowledge base.
    pub kb_root: PathBuf,
    pub server: ServerConfig,
    /// How `graphrag` is invoked.
    pub program: Program,
    pub limits: LimitsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kb_root: PathBuf::from("./kbs"),
            server: ServerConfig::default(),
            program: Program::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8012,
        }
    }
}

/// Concurrency and deadline limits for external processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum number of `graphrag` processes running at once.
    pub max_concurrent_jobs: usize,
    /// Deadline for index jobs; `null` disables it.
    pub index_timeout_secs: Option<u64>,
    /// Deadline for query and init jobs; `null` disables it.
    pub query_timeout_secs: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            index_timeout_secs: Some(6 * 60 * 60),
            query_timeout_secs: Some(10 * 60),
        }
    }
}

impl LimitsConfig {
    pub fn index_timeout(&self) -> Option<Duration> {
        self.index_timeout_secs.map(Duration::from_secs)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_secs.map(Duration::from_secs)
    }
}
