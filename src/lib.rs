//! graphgate - an HTTP gateway that runs the `graphrag` command-line tool.
//!
//! Jobs (init, index, query) become `graphrag` processes. Their output is
//! drained concurrently from both channels and assembled either into one
//! buffered answer or into an incremental event stream. Index jobs run in
//! the background and are tracked in a [`TaskRegistry`].

pub mod api;
pub mod config;
pub mod core;
pub mod execution;
pub mod gateway;
pub mod kb;
pub mod registry;
pub mod testing;

pub use config::{ConfigError, GatewayConfig};
pub use core::job::{IndexRequest, InitRequest, JobError, JobKind, QueryRequest};
pub use core::types::TaskId;
pub use execution::{EventStream, JobRunner, Program, StreamEvent};
pub use gateway::Gateway;
pub use kb::KnowledgeBases;
pub use registry::{JobSupervisor, TaskRegistry, TaskSnapshot, TaskStatus};
