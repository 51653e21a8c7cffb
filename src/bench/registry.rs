//! In-memory job registry
//!
//! The single source of truth for job records. One lock guards the whole
//! table; every mutation goes through [`JobRegistry::update`] or
//! [`JobRegistry::request_cancel`], and readers always get a cloned snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::models::{Job, JobId, JobKind, JobParams, JobSummary, JobUpdate};
use crate::{BenchError, Result};

struct JobEntry {
    job: Job,
    cancel_flag: Arc<AtomicBool>,
}

/// Concurrency-safe table of job records
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, JobEntry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new queued job and return its identifier
    pub fn create(&self, kind: JobKind, params: JobParams) -> JobId {
        let mut jobs = self.jobs.lock();

        // v4 collisions are practically impossible, but the id must never be reused
        let mut id = JobId::new();
        while jobs.contains_key(&id) {
            id = JobId::new();
        }

        jobs.insert(
            id,
            JobEntry {
                job: Job::new(id, kind, params),
                cancel_flag: Arc::new(AtomicBool::new(false)),
            },
        );
        debug!(job_id = %id, kind = %kind, "job registered");
        id
    }

    /// Merge a partial update into a job, atomically with respect to readers
    pub fn update(&self, id: &JobId, update: JobUpdate) -> Result<()> {
        let mut jobs = self.jobs.lock();
        let entry = jobs.get_mut(id).ok_or(BenchError::JobNotFound(*id))?;
        entry.job.apply(update)
    }

    /// Snapshot of a job
    pub fn get(&self, id: &JobId) -> Result<Job> {
        let jobs = self.jobs.lock();
        jobs.get(id)
            .map(|entry| entry.job.clone())
            .ok_or(BenchError::JobNotFound(*id))
    }

    /// Flag a job for cooperative cancellation.
    ///
    /// Idempotent; on a job that already finished this only records the
    /// request and has no other effect.
    pub fn request_cancel(&self, id: &JobId) -> Result<()> {
        let mut jobs = self.jobs.lock();
        let entry = jobs.get_mut(id).ok_or(BenchError::JobNotFound(*id))?;

        if !entry.job.cancel_requested {
            entry.job.cancel_requested = true;
            entry.cancel_flag.store(true, Ordering::SeqCst);
            info!(job_id = %id, status = %entry.job.status, "cancellation requested");
        }
        Ok(())
    }

    /// Shared flag that flips to true once cancellation is requested
    pub fn cancel_flag(&self, id: &JobId) -> Result<Arc<AtomicBool>> {
        let jobs = self.jobs.lock();
        jobs.get(id)
            .map(|entry| Arc::clone(&entry.cancel_flag))
            .ok_or(BenchError::JobNotFound(*id))
    }

    /// Summaries of every job, newest first
    pub fn list(&self) -> Vec<JobSummary> {
        let jobs = self.jobs.lock();
        let mut summaries: Vec<JobSummary> = jobs.values().map(|e| e.job.summary()).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// Ids of jobs that are still queued or running
    pub fn active_ids(&self) -> Vec<JobId> {
        let jobs = self.jobs.lock();
        jobs.values()
            .filter(|e| !e.job.status.is_terminal())
            .map(|e| e.job.id)
            .collect()
    }

    /// Number of jobs that are still queued or running
    pub fn active_count(&self) -> usize {
        let jobs = self.jobs.lock();
        jobs.values()
            .filter(|e| !e.job.status.is_terminal())
            .count()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop finished jobs older than `retention`, then the oldest finished
    /// jobs beyond `max_retained`. Queued and running jobs are never evicted.
    pub fn evict_expired(&self, retention: Duration, max_retained: usize) -> usize {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();

        jobs.retain(|_, entry| match entry.job.ended_at {
            Some(ended_at) if entry.job.status.is_terminal() => now - ended_at < retention,
            _ => true,
        });

        if max_retained > 0 && jobs.len() > max_retained {
            let mut finished: Vec<_> = jobs
                .values()
                .filter_map(|e| e.job.ended_at.map(|ended| (ended, e.job.id)))
                .collect();
            finished.sort_by_key(|(ended, _)| *ended);

            let excess = jobs.len() - max_retained;
            for (_, id) in finished.into_iter().take(excess) {
                jobs.remove(&id);
            }
        }

        let evicted = before - jobs.len();
        if evicted > 0 {
            info!(evicted, remaining = jobs.len(), "evicted finished jobs");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BenchmarkResult, CpuResult, JobStatus, Progress, Transition};
    use std::collections::HashSet;
    use std::thread;

    fn params() -> JobParams {
        JobParams {
            duration_secs: 1,
            size_mb: None,
            threads: Some(2),
        }
    }

    fn cpu_result() -> BenchmarkResult {
        BenchmarkResult::Cpu(CpuResult {
            threads: 2,
            duration_secs: 1,
            elapsed_secs: 1.0,
            sha256_ops: 100,
            ops_per_sec: 100.0,
        })
    }

    fn finish(registry: &JobRegistry, id: &JobId) {
        registry
            .update(id, JobUpdate::transition(Transition::Start))
            .unwrap();
        registry
            .update(id, JobUpdate::transition(Transition::Complete(cpu_result())))
            .unwrap();
    }

    #[test]
    fn test_create_and_get() {
        let registry = JobRegistry::new();
        let id = registry.create(JobKind::Cpu, params());

        let job = registry.get(&id).unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.kind, JobKind::Cpu);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_ids_are_not_found() {
        let registry = JobRegistry::new();
        let id = JobId::new();
        assert!(matches!(registry.get(&id), Err(BenchError::JobNotFound(_))));
        assert!(matches!(
            registry.request_cancel(&id),
            Err(BenchError::JobNotFound(_))
        ));
        assert!(matches!(
            registry.update(&id, JobUpdate::progress(10.0)),
            Err(BenchError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_creates_get_distinct_ids() {
        let registry = Arc::new(JobRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..50)
                        .map(|_| registry.create(JobKind::Memory, params()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id));
            }
        }
        assert_eq!(registry.len(), 400);
    }

    #[test]
    fn test_request_cancel_is_idempotent() {
        let registry = JobRegistry::new();
        let id = registry.create(JobKind::Cpu, params());
        let flag = registry.cancel_flag(&id).unwrap();
        assert!(!flag.load(Ordering::SeqCst));

        registry.request_cancel(&id).unwrap();
        registry.request_cancel(&id).unwrap();

        assert!(flag.load(Ordering::SeqCst));
        assert!(registry.get(&id).unwrap().cancel_requested);
        assert_eq!(registry.get(&id).unwrap().status, JobStatus::Queued);
    }

    #[test]
    fn test_cancel_on_finished_job_is_a_no_op() {
        let registry = JobRegistry::new();
        let id = registry.create(JobKind::Cpu, params());
        finish(&registry, &id);

        registry.request_cancel(&id).unwrap();
        let job = registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.result.is_some());
    }

    #[test]
    fn test_update_merges_progress_and_metrics() {
        let registry = JobRegistry::new();
        let id = registry.create(JobKind::Gpu, params());
        registry
            .update(&id, JobUpdate::transition(Transition::Start))
            .unwrap();
        registry
            .update(&id, JobUpdate::default().with_progress(Progress::Unknown))
            .unwrap();

        let job = registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress, None);
    }

    #[test]
    fn test_readers_never_see_completed_without_result() {
        let registry = Arc::new(JobRegistry::new());
        let ids: Vec<_> = (0..20)
            .map(|_| registry.create(JobKind::Cpu, params()))
            .collect();

        let reader = {
            let registry = Arc::clone(&registry);
            let ids = ids.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    for id in &ids {
                        let job = registry.get(id).unwrap();
                        assert_eq!(job.status == JobStatus::Completed, job.result.is_some());
                    }
                }
            })
        };

        for id in &ids {
            finish(&registry, id);
        }
        reader.join().unwrap();
    }

    #[test]
    fn test_active_count_and_list() {
        let registry = JobRegistry::new();
        let a = registry.create(JobKind::Cpu, params());
        let b = registry.create(JobKind::Disk, params());
        finish(&registry, &a);

        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.active_ids(), vec![b]);
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_eviction_keeps_active_jobs() {
        let registry = JobRegistry::new();
        let done = registry.create(JobKind::Cpu, params());
        let running = registry.create(JobKind::Cpu, params());
        finish(&registry, &done);
        registry
            .update(&running, JobUpdate::transition(Transition::Start))
            .unwrap();

        // Nothing is old enough yet
        assert_eq!(registry.evict_expired(Duration::from_secs(3600), 0), 0);

        assert_eq!(registry.evict_expired(Duration::ZERO, 0), 1);
        assert!(registry.get(&done).is_err());
        assert!(registry.get(&running).is_ok());
    }

    #[test]
    fn test_eviction_caps_retained_jobs() {
        let registry = JobRegistry::new();
        let ids: Vec<_> = (0..5)
            .map(|_| {
                let id = registry.create(JobKind::Memory, params());
                finish(&registry, &id);
                id
            })
            .collect();

        let evicted = registry.evict_expired(Duration::from_secs(3600), 3);
        assert_eq!(evicted, 2);
        assert_eq!(registry.len(), 3);
        let remaining = ids.iter().filter(|id| registry.get(id).is_ok()).count();
        assert_eq!(remaining, 3);
    }
}
