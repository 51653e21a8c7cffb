//! Data models module
//!
//! Contains the job record, its state machine, and the result and metrics
//! payloads produced by benchmark workloads.

pub mod job;
pub mod result;

// Re-export commonly used types
pub use job::{
    BenchmarkRequest, Job, JobId, JobKind, JobParams, JobStatus, JobSummary, JobUpdate, Progress,
    Transition,
};
pub use result::{BenchmarkResult, CpuResult, DiskResult, GpuResult, JobMetrics, MemoryResult};
