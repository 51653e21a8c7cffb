//! Sequential disk benchmark
//!
//! Writes a zero-filled scratch file in large chunks, syncs it, then reads
//! it back. Write progress covers 0-50%, read progress 50-100%. The scratch
//! file is owned by a [`ScratchFile`] guard and removed on every exit path.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::context::{JobContext, RunOutcome, RunnerSettings};
use crate::io::disk::{drop_page_cache, ScratchFile};
use crate::models::{BenchmarkResult, DiskResult, JobMetrics, JobParams, Progress};
use crate::util::{calculate_throughput_mbps, format_bytes, mib_to_bytes};
use crate::{BenchError, Result};

/// Size of each sequential write and read
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Write,
    Read,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Write => "write",
            Phase::Read => "read",
        }
    }

    /// Map phase-local completion onto the overall progress range
    fn progress(&self, done: u64, total: u64) -> f64 {
        let fraction = if total == 0 {
            1.0
        } else {
            done as f64 / total as f64
        };
        match self {
            Phase::Write => fraction * 50.0,
            Phase::Read => 50.0 + fraction * 50.0,
        }
    }
}

/// Sequential write/read benchmark executor
pub struct DiskBenchmark {
    size_mb: u64,
    total_bytes: u64,
    /// Hard limit on the whole run
    ceiling: Duration,
    scratch_dir: PathBuf,
}

impl DiskBenchmark {
    pub fn new(params: &JobParams, settings: &RunnerSettings) -> Self {
        let size_mb = params.size_mb.unwrap_or(1).max(1);
        Self {
            size_mb,
            total_bytes: mib_to_bytes(size_mb),
            ceiling: Duration::from_secs(params.duration_secs) + settings.grace_period,
            scratch_dir: settings.scratch_dir.clone(),
        }
    }

    /// Run the benchmark on the calling thread; blocks until finished
    pub fn run(&self, ctx: &JobContext) -> Result<RunOutcome> {
        let start = Instant::now();
        let mut scratch = ScratchFile::create(&self.scratch_dir, &ctx.id()).map_err(|e| {
            BenchError::Workload(format!(
                "Failed to create scratch file in {}: {}",
                self.scratch_dir.display(),
                e
            ))
        })?;

        info!(
            job_id = %ctx.id(),
            path = %scratch.path().display(),
            size = %format_bytes(self.total_bytes),
            "starting disk benchmark"
        );

        let Some(write_elapsed) = self.write_phase(ctx, &mut scratch, start)? else {
            return Ok(RunOutcome::Canceled);
        };

        if let Err(e) = drop_page_cache(scratch.file()) {
            warn!(job_id = %ctx.id(), error = %e, "could not drop page cache, read numbers may be inflated");
        }

        let Some(read_elapsed) = self.read_phase(ctx, &scratch, start)? else {
            return Ok(RunOutcome::Canceled);
        };

        debug!(
            job_id = %ctx.id(),
            write_ms = write_elapsed.as_millis() as u64,
            read_ms = read_elapsed.as_millis() as u64,
            "disk benchmark finished"
        );

        Ok(RunOutcome::Completed(BenchmarkResult::Disk(DiskResult {
            size_mb: self.size_mb,
            write_secs: write_elapsed.as_secs_f64(),
            read_secs: read_elapsed.as_secs_f64(),
            write_mb_s: calculate_throughput_mbps(self.total_bytes, write_elapsed),
            read_mb_s: calculate_throughput_mbps(self.total_bytes, read_elapsed),
        })))
    }

    /// Write and sync the scratch file; `None` when canceled
    fn write_phase(
        &self,
        ctx: &JobContext,
        scratch: &mut ScratchFile,
        start: Instant,
    ) -> Result<Option<Duration>> {
        let buffer = vec![0u8; CHUNK_SIZE];
        let phase_start = Instant::now();
        let mut last_report = Instant::now();
        let mut bytes_written = 0u64;

        while bytes_written < self.total_bytes {
            if ctx.is_cancelled() {
                return Ok(None);
            }
            self.check_ceiling(start)?;

            let remaining = self.total_bytes - bytes_written;
            let write_size = remaining.min(CHUNK_SIZE as u64) as usize;
            scratch
                .file_mut()
                .write_all(&buffer[..write_size])
                .map_err(|e| {
                    BenchError::Workload(format!("Write failed at byte {}: {}", bytes_written, e))
                })?;
            bytes_written += write_size as u64;

            if last_report.elapsed() >= ctx.poll_interval() {
                self.report(ctx, Phase::Write, bytes_written, phase_start.elapsed(), start);
                last_report = Instant::now();
            }
        }

        // Force sync to disk so the write numbers include durability
        scratch
            .file()
            .sync_all()
            .map_err(|e| BenchError::Workload(format!("Sync failed: {}", e)))?;
        self.check_ceiling(start)?;

        let elapsed = phase_start.elapsed();
        self.report(ctx, Phase::Write, bytes_written, elapsed, start);
        Ok(Some(elapsed))
    }

    /// Read the scratch file back; `None` when canceled
    fn read_phase(
        &self,
        ctx: &JobContext,
        scratch: &ScratchFile,
        start: Instant,
    ) -> Result<Option<Duration>> {
        let mut reader = scratch
            .open_read()
            .map_err(|e| BenchError::Workload(format!("Failed to reopen scratch file: {}", e)))?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let phase_start = Instant::now();
        let mut last_report = Instant::now();
        let mut bytes_read = 0u64;

        while bytes_read < self.total_bytes {
            if ctx.is_cancelled() {
                return Ok(None);
            }
            self.check_ceiling(start)?;

            let read = reader.read(&mut buffer).map_err(|e| {
                BenchError::Workload(format!("Read failed at byte {}: {}", bytes_read, e))
            })?;
            if read == 0 {
                return Err(BenchError::Workload(format!(
                    "Unexpected end of scratch file at byte {} (expected {})",
                    bytes_read, self.total_bytes
                )));
            }
            bytes_read += read as u64;

            if last_report.elapsed() >= ctx.poll_interval() {
                self.report(ctx, Phase::Read, bytes_read, phase_start.elapsed(), start);
                last_report = Instant::now();
            }
        }

        let elapsed = phase_start.elapsed();
        self.report(ctx, Phase::Read, bytes_read, elapsed, start);
        Ok(Some(elapsed))
    }

    fn check_ceiling(&self, start: Instant) -> Result<()> {
        if start.elapsed() > self.ceiling {
            return Err(BenchError::Timeout {
                what: "disk benchmark".to_string(),
                after: self.ceiling,
            });
        }
        Ok(())
    }

    fn report(&self, ctx: &JobContext, phase: Phase, bytes: u64, phase_elapsed: Duration, start: Instant) {
        ctx.report(
            Progress::Percent(phase.progress(bytes, self.total_bytes)),
            JobMetrics {
                elapsed_secs: Some(start.elapsed().as_secs_f64()),
                phase: Some(phase.as_str().to_string()),
                bytes_processed: Some(bytes),
                throughput_mb_s: Some(calculate_throughput_mbps(bytes, phase_elapsed)),
                ..JobMetrics::default()
            },
        );
    }
}
