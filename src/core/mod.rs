//! Core types: identifiers, job requests, environment overrides.

pub mod environment;
pub mod job;
pub mod types;
