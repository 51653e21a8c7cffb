//! Benchmark engine module
//!
//! Contains the job registry, the scheduler that turns requests into
//! running jobs, and one runner per workload kind.

pub mod context;
pub mod cpu;
pub mod disk;
pub mod gpu;
pub mod memory;
pub mod registry;
pub mod scheduler;

// Re-export commonly used types
pub use context::{JobContext, RunOutcome, RunnerSettings};
pub use cpu::CpuBenchmark;
pub use disk::DiskBenchmark;
pub use gpu::GpuBenchmark;
pub use memory::MemoryBenchmark;
pub use registry::JobRegistry;
pub use scheduler::JobScheduler;
