//! Memory copy benchmark
//!
//! Repeatedly copies a random source block into a larger destination
//! buffer, wrapping around at the end, until the duration elapses.

use std::time::{Duration, Instant};

use rand::{rngs::SmallRng, RngCore, SeedableRng};
use tracing::info;

use super::context::{JobContext, RunOutcome};
use crate::models::{BenchmarkResult, JobMetrics, JobParams, MemoryResult, Progress};
use crate::util::{calculate_throughput_mbps, mib_to_bytes, percent_of, MIB};
use crate::{BenchError, Result};

/// Upper bound on the source block size
pub const MAX_BLOCK_SIZE: usize = 4 * 1024 * 1024;

pub struct MemoryBenchmark {
    size_mb: u64,
    duration: Duration,
}

impl MemoryBenchmark {
    pub fn new(params: &JobParams) -> Self {
        Self {
            size_mb: params.size_mb.unwrap_or(1).max(1),
            duration: Duration::from_secs(params.duration_secs),
        }
    }

    /// Run the benchmark on the calling thread; blocks until finished
    pub fn run(&self, ctx: &JobContext) -> Result<RunOutcome> {
        let dest_len = usize::try_from(mib_to_bytes(self.size_mb)).map_err(|_| {
            BenchError::Workload(format!("{} MB does not fit in memory on this host", self.size_mb))
        })?;
        let block_len = dest_len.min(MAX_BLOCK_SIZE);

        let mut dest: Vec<u8> = Vec::new();
        dest.try_reserve_exact(dest_len).map_err(|e| {
            BenchError::Workload(format!("Failed to allocate {} MB buffer: {}", self.size_mb, e))
        })?;
        dest.resize(dest_len, 0);

        let mut source = vec![0u8; block_len];
        SmallRng::from_entropy().fill_bytes(&mut source);

        info!(job_id = %ctx.id(), size_mb = self.size_mb, duration_secs = self.duration.as_secs(), "starting memory benchmark");

        let start = Instant::now();
        let deadline = start + self.duration;
        let mut last_report = start;
        let mut offset = 0usize;
        let mut copied = 0u64;

        loop {
            if ctx.is_cancelled() {
                return Ok(RunOutcome::Canceled);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            if offset + block_len > dest_len {
                offset = 0;
            }
            dest[offset..offset + block_len].copy_from_slice(&source);
            offset += block_len;
            copied += block_len as u64;

            if now.duration_since(last_report) >= ctx.poll_interval() {
                let elapsed = now - start;
                ctx.report(
                    Progress::Percent(percent_of(elapsed, self.duration)),
                    JobMetrics {
                        elapsed_secs: Some(elapsed.as_secs_f64()),
                        bytes_processed: Some(copied),
                        throughput_mb_s: Some(calculate_throughput_mbps(copied, elapsed)),
                        ..JobMetrics::default()
                    },
                );
                last_report = now;
            }
        }
        std::hint::black_box(&dest);

        let elapsed = start.elapsed();
        Ok(RunOutcome::Completed(BenchmarkResult::Memory(MemoryResult {
            size_mb: self.size_mb,
            duration_secs: self.duration.as_secs(),
            elapsed_secs: elapsed.as_secs_f64(),
            copied_mb: copied as f64 / MIB as f64,
            mem_copy_mb_s: calculate_throughput_mbps(copied, elapsed),
        })))
    }
}
