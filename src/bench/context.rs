//! Per-job handle given to workload runners

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::registry::JobRegistry;
use crate::config::ServiceConfig;
use crate::models::{BenchmarkResult, JobId, JobMetrics, JobUpdate, Progress};
use crate::Result;

/// How a workload ended when it did not fail
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(BenchmarkResult),
    Canceled,
}

/// Runner settings that come from the service configuration
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub poll_interval: Duration,
    pub grace_period: Duration,
    pub scratch_dir: PathBuf,
}

impl From<&ServiceConfig> for RunnerSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            grace_period: config.grace_period,
            scratch_dir: config.scratch_dir.clone(),
        }
    }
}

/// A runner's view of its own job: progress reporting and cancellation
#[derive(Clone)]
pub struct JobContext {
    id: JobId,
    registry: Arc<JobRegistry>,
    cancel_flag: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl JobContext {
    pub fn new(id: JobId, registry: Arc<JobRegistry>, poll_interval: Duration) -> Result<Self> {
        let cancel_flag = registry.cancel_flag(&id)?;
        Ok(Self {
            id,
            registry,
            cancel_flag,
            poll_interval,
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Interval at which the runner should report and check for cancellation
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    /// Flag shared with worker threads that must not hold the context
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    /// Publish progress and a fresh metrics snapshot
    pub fn report(&self, progress: Progress, metrics: JobMetrics) {
        let update = JobUpdate::default()
            .with_progress(progress)
            .with_metrics(metrics);
        if let Err(e) = self.registry.update(&self.id, update) {
            debug!(job_id = %self.id, error = %e, "progress report dropped");
        }
    }
}
