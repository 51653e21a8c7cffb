//! Job data model and state machine
//!
//! A job is one invocation of a benchmark workload. Its status only moves
//! forward along `queued -> running -> {completed, failed, canceled}`, and
//! the `result`/`error` payloads are tied to the matching terminal status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use super::result::{BenchmarkResult, JobMetrics};
use crate::{BenchError, Result};

/// Opaque job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Workload kind, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Cpu,
    Disk,
    Memory,
    Gpu,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [JobKind::Cpu, JobKind::Disk, JobKind::Memory, JobKind::Gpu];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Cpu => "cpu",
            JobKind::Disk => "disk",
            JobKind::Memory => "memory",
            JobKind::Gpu => "gpu",
        }
    }

    /// Whether the workload needs a size parameter
    pub fn uses_size(&self) -> bool {
        matches!(self, JobKind::Disk | JobKind::Memory)
    }

    /// Whether the workload needs a worker count
    pub fn uses_threads(&self) -> bool {
        matches!(self, JobKind::Cpu)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(JobKind::Cpu),
            "disk" => Ok(JobKind::Disk),
            "memory" => Ok(JobKind::Memory),
            "gpu" => Ok(JobKind::Gpu),
            other => Err(BenchError::InvalidRequest(format!(
                "unknown benchmark type '{}' (expected cpu, disk, memory or gpu)",
                other
            ))),
        }
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw "start benchmark" payload as received over HTTP
///
/// Numeric fields are signed so that negative values reach validation
/// instead of failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchmarkRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub size_mb: Option<i64>,
    #[serde(default)]
    pub threads: Option<i64>,
}

impl BenchmarkRequest {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            ..Self::default()
        }
    }

    pub fn with_duration(mut self, secs: i64) -> Self {
        self.duration = Some(secs);
        self
    }

    pub fn with_size_mb(mut self, size_mb: i64) -> Self {
        self.size_mb = Some(size_mb);
        self
    }

    pub fn with_threads(mut self, threads: i64) -> Self {
        self.threads = Some(threads);
        self
    }
}

/// Accepted, normalised job parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub duration_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
}

/// Status change requested by a runner
#[derive(Debug, Clone)]
pub enum Transition {
    /// queued -> running
    Start,
    /// running -> completed, with the final measurements
    Complete(BenchmarkResult),
    /// running -> failed, with a diagnostic message
    Fail(String),
    /// running -> canceled
    Cancel,
}

impl Transition {
    pub fn target(&self) -> JobStatus {
        match self {
            Transition::Start => JobStatus::Running,
            Transition::Complete(_) => JobStatus::Completed,
            Transition::Fail(_) => JobStatus::Failed,
            Transition::Cancel => JobStatus::Canceled,
        }
    }
}

/// Fractional progress, or unknown for tools that cannot report it
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Percent(f64),
    Unknown,
}

/// Partial update merged atomically into a job record
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub transition: Option<Transition>,
    pub progress: Option<Progress>,
    pub metrics: Option<JobMetrics>,
}

impl JobUpdate {
    pub fn transition(transition: Transition) -> Self {
        Self {
            transition: Some(transition),
            ..Self::default()
        }
    }

    pub fn progress(percent: f64) -> Self {
        Self {
            progress: Some(Progress::Percent(percent)),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_metrics(mut self, metrics: JobMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Consistent snapshot of a job record
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Percentage in [0, 100], or null when the workload cannot tell
    pub progress: Option<f64>,
    pub params: JobParams,
    pub metrics: JobMetrics,
    pub result: Option<BenchmarkResult>,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Serialize for Job {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Job", 13)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("kind", &self.kind)?;
        // Dashboard clients read the workload kind as `type`
        state.serialize_field("type", &self.kind)?;
        state.serialize_field("status", &self.status)?;
        state.serialize_field("progress", &self.progress)?;
        state.serialize_field("params", &self.params)?;
        state.serialize_field("metrics", &self.metrics)?;
        state.serialize_field("result", &self.result)?;
        state.serialize_field("error", &self.error)?;
        state.serialize_field("cancel_requested", &self.cancel_requested)?;
        state.serialize_field("created_at", &self.created_at)?;
        state.serialize_field("started_at", &self.started_at)?;
        state.serialize_field("ended_at", &self.ended_at)?;
        state.end()
    }
}

impl Job {
    /// A freshly queued job with zero progress and empty metrics
    pub fn new(id: JobId, kind: JobKind, params: JobParams) -> Self {
        Self {
            id,
            kind,
            status: JobStatus::Queued,
            progress: Some(0.0),
            params,
            metrics: JobMetrics::default(),
            result: None,
            error: None,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Check whether `transition` is allowed from the current status
    pub fn check_transition(&self, transition: &Transition) -> Result<()> {
        let allowed = match transition {
            Transition::Start => self.status == JobStatus::Queued,
            Transition::Complete(_) | Transition::Fail(_) | Transition::Cancel => {
                self.status == JobStatus::Running
            }
        };

        if allowed {
            Ok(())
        } else {
            Err(BenchError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: transition.target(),
            })
        }
    }

    /// Merge an update into this record.
    ///
    /// The transition is validated before anything is written, so a rejected
    /// update leaves the record untouched. Progress and metrics sent after
    /// the job reached a terminal state are dropped.
    pub fn apply(&mut self, update: JobUpdate) -> Result<()> {
        if let Some(transition) = &update.transition {
            self.check_transition(transition)?;
        }

        if !self.status.is_terminal() {
            if let Some(metrics) = update.metrics {
                self.metrics = metrics;
            }
            match update.progress {
                Some(Progress::Percent(p)) => {
                    let p = if p.is_finite() { p.clamp(0.0, 100.0) } else { 0.0 };
                    self.progress = Some(self.progress.map_or(p, |current| current.max(p)));
                }
                Some(Progress::Unknown) => self.progress = None,
                None => {}
            }
        }

        let Some(transition) = update.transition else {
            return Ok(());
        };
        let now = Utc::now();
        match transition {
            Transition::Start => {
                self.status = JobStatus::Running;
                self.started_at = Some(now);
            }
            Transition::Complete(result) => {
                self.status = JobStatus::Completed;
                self.result = Some(result);
                self.progress = Some(100.0);
                self.ended_at = Some(now);
            }
            Transition::Fail(message) => {
                self.status = JobStatus::Failed;
                self.error = Some(message);
                self.ended_at = Some(now);
            }
            Transition::Cancel => {
                self.status = JobStatus::Canceled;
                self.ended_at = Some(now);
            }
        }

        Ok(())
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            kind: self.kind,
            status: self.status,
            progress: self.progress,
            created_at: self.created_at,
            ended_at: self.ended_at,
        }
    }
}

/// Short listing entry for a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::result::{BenchmarkResult, MemoryResult};

    fn queued_job() -> Job {
        Job::new(
            JobId::new(),
            JobKind::Memory,
            JobParams {
                duration_secs: 2,
                size_mb: Some(64),
                threads: None,
            },
        )
    }

    fn memory_result() -> BenchmarkResult {
        BenchmarkResult::Memory(MemoryResult {
            size_mb: 64,
            duration_secs: 2,
            elapsed_secs: 2.0,
            copied_mb: 1024.0,
            mem_copy_mb_s: 512.0,
        })
    }

    #[test]
    fn test_job_kind_parsing() {
        assert_eq!("cpu".parse::<JobKind>().unwrap(), JobKind::Cpu);
        assert_eq!("Memory".parse::<JobKind>().unwrap(), JobKind::Memory);
        let err = "network".parse::<JobKind>().unwrap_err();
        assert!(matches!(err, BenchError::InvalidRequest(_)));
    }

    #[test]
    fn test_job_id_round_trips_through_string() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn test_new_job_is_queued_and_empty() {
        let job = queued_job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, Some(0.0));
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert!(!job.cancel_requested);
    }

    #[test]
    fn test_full_lifecycle_to_completed() {
        let mut job = queued_job();
        job.apply(JobUpdate::transition(Transition::Start)).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());

        job.apply(JobUpdate::progress(40.0)).unwrap();
        job.apply(JobUpdate::transition(Transition::Complete(memory_result())))
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, Some(100.0));
        assert!(job.result.is_some());
        assert!(job.error.is_none());
        assert!(job.ended_at.is_some());
    }

    #[test]
    fn test_terminal_jobs_are_never_resurrected() {
        let mut job = queued_job();
        job.apply(JobUpdate::transition(Transition::Start)).unwrap();
        job.apply(JobUpdate::transition(Transition::Fail("disk full".into())))
            .unwrap();

        let err = job
            .apply(JobUpdate::transition(Transition::Complete(memory_result())))
            .unwrap_err();
        assert!(matches!(
            err,
            BenchError::InvalidTransition {
                from: JobStatus::Failed,
                to: JobStatus::Completed,
                ..
            }
        ));
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
        assert_eq!(job.error.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_cannot_finish_a_queued_job() {
        let mut job = queued_job();
        assert!(job.apply(JobUpdate::transition(Transition::Cancel)).is_err());
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn test_progress_is_clamped_and_monotonic() {
        let mut job = queued_job();
        job.apply(JobUpdate::transition(Transition::Start)).unwrap();

        job.apply(JobUpdate::progress(30.0)).unwrap();
        job.apply(JobUpdate::progress(20.0)).unwrap();
        assert_eq!(job.progress, Some(30.0));

        job.apply(JobUpdate::progress(250.0)).unwrap();
        assert_eq!(job.progress, Some(100.0));

        job.apply(JobUpdate::progress(f64::NAN)).unwrap();
        assert_eq!(job.progress, Some(100.0));
    }

    #[test]
    fn test_rejected_update_does_not_partially_merge() {
        let mut job = queued_job();
        let update = JobUpdate::transition(Transition::Complete(memory_result()))
            .with_progress(Progress::Percent(80.0));
        assert!(job.apply(update).is_err());
        assert_eq!(job.progress, Some(0.0));
        assert!(job.result.is_none());
    }

    #[test]
    fn test_updates_after_terminal_state_are_dropped() {
        let mut job = queued_job();
        job.apply(JobUpdate::transition(Transition::Start)).unwrap();
        job.apply(JobUpdate::progress(55.0)).unwrap();
        job.apply(JobUpdate::transition(Transition::Cancel)).unwrap();

        job.apply(JobUpdate::default().with_progress(Progress::Unknown))
            .unwrap();
        assert_eq!(job.progress, Some(55.0));
        assert_eq!(job.status, JobStatus::Canceled);
    }

    #[test]
    fn test_snapshot_serialization() {
        let job = queued_job();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["kind"], "memory");
        assert_eq!(json["type"], "memory");
        assert_eq!(json["status"], "queued");
        assert_eq!(json["params"]["size_mb"], 64);
        assert!(json["params"].get("threads").is_none());
        assert!(json["result"].is_null());

        let parsed: Job = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.kind, JobKind::Memory);
    }
}
