//! SRVBENCH - Server benchmark job service
//!
//! Runs CPU, disk, memory and GPU stress workloads as background jobs
//! and exposes them through an authenticated HTTP polling API.

use std::time::Duration;

use thiserror::Error;

pub mod api;
pub mod bench;
pub mod config;
pub mod io;
pub mod models;
pub mod util;

use models::{JobId, JobStatus};

/// Common error type for every layer of the service
#[derive(Debug, Error)]
pub enum BenchError {
    /// Request rejected before a job was created
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// No job with this identifier is known
    #[error("Job not found: {0}")]
    JobNotFound(JobId),
    /// Admission control refused a new job
    #[error("Too many active jobs: {active} running (limit {limit})")]
    Busy { active: usize, limit: usize },
    /// A status transition that the job state machine forbids
    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration validation or parsing error
    #[error("Configuration error: {0}")]
    Config(String),
    /// Workload execution error
    #[error("Benchmark error: {0}")]
    Workload(String),
    /// External program could not be launched or misbehaved
    #[error("Command '{program}' failed: {message}")]
    CommandFailed { program: String, message: String },
    /// Operation exceeded its deadline
    #[error("{what} timed out after {}s", .after.as_secs())]
    Timeout { what: String, after: Duration },
}

/// Result type alias for SRVBENCH operations
pub type Result<T> = std::result::Result<T, BenchError>;

// Common types and constants
pub const APP_NAME: &str = "srvbench";
pub const CONFIG_FILE: &str = "srvbench.toml";
pub const SCRATCH_FILE_PREFIX: &str = "srvbench_";
pub const MAX_LOG_TAIL_LINES: usize = 50;
