//! Job scheduler
//!
//! Turns benchmark requests into running jobs: validates and normalises the
//! parameters, applies admission control, registers the job, and spawns a
//! task that drives the matching runner and finalizes the job exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::context::{JobContext, RunOutcome, RunnerSettings};
use super::cpu::CpuBenchmark;
use super::disk::DiskBenchmark;
use super::gpu::GpuBenchmark;
use super::memory::MemoryBenchmark;
use super::registry::JobRegistry;
use crate::config::ServiceConfig;
use crate::models::{
    BenchmarkRequest, Job, JobId, JobKind, JobParams, JobSummary, JobUpdate, Transition,
};
use crate::util::logical_cores;
use crate::{BenchError, Result};

/// Entry point for starting, inspecting and canceling jobs
pub struct JobScheduler {
    registry: Arc<JobRegistry>,
    config: Arc<ServiceConfig>,
    /// Serialises the admission check with job creation
    admission: Mutex<()>,
}

impl JobScheduler {
    pub fn new(registry: Arc<JobRegistry>, config: Arc<ServiceConfig>) -> Self {
        Self {
            registry,
            config,
            admission: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Validate a request and launch its job without waiting for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, request: &BenchmarkRequest) -> Result<JobId> {
        let (kind, params) = self.normalize(request)?;

        let id = {
            let _admission = self.admission.lock();
            let limit = self.config.limits.max_concurrent_jobs;
            if limit > 0 {
                let active = self.registry.active_count();
                if active >= limit {
                    warn!(kind = %kind, active, limit, "benchmark rejected by admission control");
                    return Err(BenchError::Busy { active, limit });
                }
            }
            self.registry.create(kind, params.clone())
        };

        info!(
            job_id = %id,
            kind = %kind,
            duration_secs = params.duration_secs,
            size_mb = ?params.size_mb,
            threads = ?params.threads,
            "benchmark accepted"
        );

        let ctx = JobContext::new(id, Arc::clone(&self.registry), self.config.poll_interval)?;
        let settings = RunnerSettings::from(self.config.as_ref());
        tokio::spawn(run_job(Arc::clone(&self.registry), ctx, kind, params, settings));

        Ok(id)
    }

    /// Check a request against the configured bounds and fill in defaults
    pub fn normalize(&self, request: &BenchmarkRequest) -> Result<(JobKind, JobParams)> {
        let kind: JobKind = request.kind.parse()?;
        let limits = &self.config.limits;
        let defaults = &self.config.defaults;

        let duration_secs = match request.duration {
            None => defaults.duration_secs,
            Some(d) if d < 1 => {
                return Err(BenchError::InvalidRequest(format!(
                    "duration must be at least 1 second (got {})",
                    d
                )))
            }
            Some(d) if d as u64 > limits.max_duration_secs => {
                return Err(BenchError::InvalidRequest(format!(
                    "duration must not exceed {} seconds (got {})",
                    limits.max_duration_secs, d
                )))
            }
            Some(d) => d as u64,
        };

        let size_mb = if kind.uses_size() {
            Some(match request.size_mb {
                None => defaults.size_mb,
                Some(s) if s < 1 || s as u64 > limits.max_size_mb => {
                    return Err(BenchError::InvalidRequest(format!(
                        "size_mb must be between 1 and {} (got {})",
                        limits.max_size_mb, s
                    )))
                }
                Some(s) => s as u64,
            })
        } else {
            None
        };

        let threads = if kind.uses_threads() {
            Some(match request.threads {
                None => logical_cores().min(limits.max_threads),
                Some(t) if t < 1 || t as u64 > limits.max_threads as u64 => {
                    return Err(BenchError::InvalidRequest(format!(
                        "threads must be between 1 and {} (got {})",
                        limits.max_threads, t
                    )))
                }
                Some(t) => t as usize,
            })
        } else {
            None
        };

        Ok((
            kind,
            JobParams {
                duration_secs,
                size_mb,
                threads,
            },
        ))
    }

    /// Latest snapshot of a job
    pub fn status(&self, id: &JobId) -> Result<Job> {
        self.registry.get(id)
    }

    /// Request cooperative cancellation; returns immediately
    pub fn cancel(&self, id: &JobId) -> Result<()> {
        self.registry.request_cancel(id)
    }

    pub fn list(&self) -> Vec<JobSummary> {
        self.registry.list()
    }

    /// Periodically evict finished jobs past the retention window
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let interval = self.config.reaper_interval;
        let retention = self.config.job_retention;
        let max_retained = self.config.max_retained_jobs;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // Skip first immediate tick

            loop {
                ticker.tick().await;
                let evicted = registry.evict_expired(retention, max_retained);
                debug!(evicted, "reaper pass finished");
            }
        })
    }

    /// Request cancellation of every queued or running job
    pub fn shutdown(&self) -> usize {
        let active = self.registry.active_ids();
        for id in &active {
            if let Err(e) = self.registry.request_cancel(id) {
                debug!(job_id = %id, error = %e, "job vanished during shutdown");
            }
        }
        if !active.is_empty() {
            info!(count = active.len(), "cancelling active jobs for shutdown");
        }
        active.len()
    }

    /// Wait until no job is queued or running, or `timeout` passes.
    /// Returns whether the registry went idle.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.registry.active_count() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

/// Drive one job from queued to its terminal state
async fn run_job(
    registry: Arc<JobRegistry>,
    ctx: JobContext,
    kind: JobKind,
    params: JobParams,
    settings: RunnerSettings,
) {
    let id = ctx.id();
    if let Err(e) = registry.update(&id, JobUpdate::transition(Transition::Start)) {
        error!(job_id = %id, error = %e, "failed to start job");
        return;
    }
    info!(job_id = %id, kind = %kind, "job started");

    let transition = match dispatch(ctx, kind, params, settings).await {
        Ok(RunOutcome::Completed(result)) => {
            info!(job_id = %id, kind = %kind, summary = %result.summary(), "job completed");
            Transition::Complete(result)
        }
        Ok(RunOutcome::Canceled) => {
            info!(job_id = %id, kind = %kind, "job canceled");
            Transition::Cancel
        }
        Err(e) => {
            warn!(job_id = %id, kind = %kind, error = %e, "job failed");
            Transition::Fail(e.to_string())
        }
    };

    if let Err(e) = registry.update(&id, JobUpdate::transition(transition)) {
        error!(job_id = %id, error = %e, "failed to finalize job");
    }
}

/// Run the workload for `kind` off the async executor's worker threads
async fn dispatch(
    ctx: JobContext,
    kind: JobKind,
    params: JobParams,
    settings: RunnerSettings,
) -> Result<RunOutcome> {
    if ctx.is_cancelled() {
        return Ok(RunOutcome::Canceled);
    }

    match kind {
        JobKind::Cpu => {
            let bench = CpuBenchmark::new(&params);
            tokio::task::spawn_blocking(move || bench.run(&ctx))
                .await
                .map_err(join_error)?
        }
        JobKind::Disk => {
            let bench = DiskBenchmark::new(&params, &settings);
            tokio::task::spawn_blocking(move || bench.run(&ctx))
                .await
                .map_err(join_error)?
        }
        JobKind::Memory => {
            let bench = MemoryBenchmark::new(&params);
            tokio::task::spawn_blocking(move || bench.run(&ctx))
                .await
                .map_err(join_error)?
        }
        JobKind::Gpu => {
            let bench = GpuBenchmark::new(&params, &settings);
            tokio::spawn(async move { bench.run(&ctx).await })
                .await
                .map_err(join_error)?
        }
    }
}

fn join_error(e: JoinError) -> BenchError {
    if e.is_panic() {
        BenchError::Workload("benchmark worker panicked".to_string())
    } else {
        BenchError::Workload("benchmark worker was aborted".to_string())
    }
}
