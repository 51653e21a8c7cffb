//! CPU hashing benchmark
//!
//! N worker threads hash a fixed 64 KiB buffer with SHA-256 until the
//! deadline, adding to a shared operation counter in batches. The runner
//! thread reports progress and watches for cancellation while they work.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::context::{JobContext, RunOutcome};
use crate::models::{BenchmarkResult, CpuResult, JobMetrics, JobParams, Progress};
use crate::util::{calculate_rate, logical_cores, percent_of};
use crate::{BenchError, Result};

/// Size of the buffer each worker digests
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Digests computed between counter updates and stop checks
const HASH_BATCH: u64 = 8;

pub struct CpuBenchmark {
    threads: usize,
    duration: Duration,
}

impl CpuBenchmark {
    pub fn new(params: &JobParams) -> Self {
        Self {
            threads: params.threads.unwrap_or_else(logical_cores).max(1),
            duration: Duration::from_secs(params.duration_secs),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run the benchmark on the calling thread; blocks until finished
    pub fn run(&self, ctx: &JobContext) -> Result<RunOutcome> {
        let counter = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let cancel = ctx.cancel_flag();
        let start = Instant::now();
        let deadline = start + self.duration;

        info!(job_id = %ctx.id(), threads = self.threads, duration_secs = self.duration.as_secs(), "starting cpu benchmark");

        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(self.threads);
        for index in 0..self.threads {
            let counter = Arc::clone(&counter);
            let stop_flag = Arc::clone(&stop);
            let cancel = Arc::clone(&cancel);
            let spawned = thread::Builder::new()
                .name(format!("srvbench-cpu-{}", index))
                .spawn(move || hash_worker(&counter, &stop_flag, &cancel, deadline));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    stop.store(true, Ordering::SeqCst);
                    join_workers(workers)?;
                    return Err(BenchError::Workload(format!(
                        "failed to spawn cpu worker {}: {}",
                        index, e
                    )));
                }
            }
        }

        let mut canceled = false;
        loop {
            if ctx.is_cancelled() {
                canceled = true;
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let elapsed = now - start;
            let operations = counter.load(Ordering::Relaxed);
            ctx.report(
                Progress::Percent(percent_of(elapsed, self.duration)),
                JobMetrics {
                    elapsed_secs: Some(elapsed.as_secs_f64()),
                    operations: Some(operations),
                    ops_per_sec: Some(calculate_rate(operations, elapsed)),
                    ..JobMetrics::default()
                },
            );

            thread::sleep(ctx.poll_interval().min(deadline - now));
        }

        stop.store(true, Ordering::SeqCst);
        join_workers(workers)?;

        if canceled {
            debug!(job_id = %ctx.id(), "cpu benchmark stopped on cancellation");
            return Ok(RunOutcome::Canceled);
        }

        let elapsed = start.elapsed();
        let sha256_ops = counter.load(Ordering::SeqCst);
        Ok(RunOutcome::Completed(BenchmarkResult::Cpu(CpuResult {
            threads: self.threads,
            duration_secs: self.duration.as_secs(),
            elapsed_secs: elapsed.as_secs_f64(),
            sha256_ops,
            ops_per_sec: calculate_rate(sha256_ops, elapsed),
        })))
    }
}

fn hash_worker(counter: &AtomicU64, stop: &AtomicBool, cancel: &AtomicBool, deadline: Instant) {
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    for (i, byte) in buffer.iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }

    loop {
        for _ in 0..HASH_BATCH {
            let digest = Sha256::digest(&buffer);
            // Feed the digest back so the work cannot be elided
            buffer[..digest.len()].copy_from_slice(&digest);
        }
        counter.fetch_add(HASH_BATCH, Ordering::Relaxed);

        if stop.load(Ordering::Relaxed) || cancel.load(Ordering::Relaxed) || Instant::now() >= deadline {
            break;
        }
    }
}

fn join_workers(workers: Vec<JoinHandle<()>>) -> Result<()> {
    let mut panicked = 0;
    for worker in workers {
        if worker.join().is_err() {
            panicked += 1;
        }
    }
    if panicked > 0 {
        return Err(BenchError::Workload(format!("{} cpu worker(s) panicked", panicked)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::context::testing::running_context;
    use crate::models::JobKind;

    fn params(duration_secs: u64, threads: usize) -> JobParams {
        JobParams {
            duration_secs,
            size_mb: None,
            threads: Some(threads),
        }
    }

    #[test]
    fn test_cpu_benchmark_counts_operations() {
        let params = params(1, 2);
        let (registry, ctx) = running_context(JobKind::Cpu, params.clone());

        let outcome = CpuBenchmark::new(&params).run(&ctx).unwrap();
        let RunOutcome::Completed(BenchmarkResult::Cpu(result)) = outcome else {
            panic!("expected a completed cpu result");
        };

        assert_eq!(result.threads, 2);
        assert!(result.sha256_ops > 0);
        assert!(result.elapsed_secs >= 1.0);
        let expected = result.sha256_ops as f64 / result.elapsed_secs;
        assert!((result.ops_per_sec - expected).abs() < 1e-6 * expected.max(1.0));

        // Progress was reported while running
        let job = registry.get(&ctx.id()).unwrap();
        assert!(job.metrics.operations.is_some());
    }

    #[test]
    fn test_cpu_benchmark_stops_on_cancel() {
        let params = params(30, 2);
        let (registry, ctx) = running_context(JobKind::Cpu, params.clone());

        let canceller = {
            let registry = Arc::clone(&registry);
            let id = ctx.id();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                registry.request_cancel(&id).unwrap();
            })
        };

        let start = Instant::now();
        let outcome = CpuBenchmark::new(&params).run(&ctx).unwrap();
        canceller.join().unwrap();

        assert!(matches!(outcome, RunOutcome::Canceled));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_default_threads_follow_host() {
        let params = JobParams {
            duration_secs: 1,
            size_mb: None,
            threads: None,
        };
        assert_eq!(CpuBenchmark::new(&params).threads(), logical_cores());
    }
}
