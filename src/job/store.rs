//! In-memory job registry with per-job serialized state transitions.
//!
//! The store is the single source of truth for job state. Mutations for a
//! given id are serialized through a per-job async mutex so a reader never
//! observes a partially applied update (percent new, message stale).
//! Mutations for different ids proceed fully in parallel.

use crate::core::error::{AppError, AppResult};
use crate::job::{BundleSpec, Job, JobOutcome, JobState, JobUpdate};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A stored job plus its cancellation token.
///
/// The token lives with the job so a concurrent `cancel` can signal the
/// running packager without any extra bookkeeping map.
struct JobEntry {
    job: Job,
    cancel: CancellationToken,
}

/// Thread-safe in-memory registry of bundle jobs.
///
/// Entries are keyed by job id (UUID, never reused). Terminal entries are
/// kept for a retention window so late snapshot reads still work, then
/// removed by [`JobStore::evict_finished`].
pub struct JobStore {
    jobs: DashMap<String, Arc<Mutex<JobEntry>>>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self { jobs: DashMap::new() }
    }

    /// Creates a new Pending job for the given spec and returns its snapshot.
    pub fn create(&self, spec: BundleSpec) -> Job {
        let id = uuid::Uuid::new_v4().to_string();
        let job = Job {
            id: id.clone(),
            spec,
            state: JobState::Pending,
            percent: 0,
            message: "queued".to_string(),
            result: None,
            created_at: Utc::now(),
            finished_at: None,
        };
        let entry = JobEntry {
            job: job.clone(),
            cancel: CancellationToken::new(),
        };
        self.jobs.insert(id, Arc::new(Mutex::new(entry)));
        job
    }

    /// Returns a consistent snapshot of the job, or `NotFound`.
    pub async fn get(&self, id: &str) -> AppResult<Job> {
        let entry = self.entry(id)?;
        let guard = entry.lock().await;
        Ok(guard.job.clone())
    }

    /// Returns the cancellation token shared with the job's packager.
    pub async fn cancel_token(&self, id: &str) -> AppResult<CancellationToken> {
        let entry = self.entry(id)?;
        let guard = entry.lock().await;
        Ok(guard.cancel.clone())
    }

    /// Atomically applies a state transition plus field updates.
    ///
    /// Fails with `InvalidTransition` (state unchanged) when the requested
    /// transition is not legal from the current state, and `NotFound` for
    /// unknown or evicted ids. `percent` never moves backwards; a
    /// `Completed` transition forces it to 100.
    ///
    /// # Returns
    ///
    /// The updated snapshot on success.
    pub async fn transition(&self, id: &str, next: JobState, update: JobUpdate) -> AppResult<Job> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock().await;

        let current = guard.job.state;
        if !current.can_transition_to(next) {
            return Err(AppError::InvalidTransition { from: current, to: next });
        }

        guard.job.state = next;
        if let Some(percent) = update.percent {
            // Monotonic: a stale or out-of-order tick can never lower it.
            guard.job.percent = guard.job.percent.max(percent.min(100));
        }
        if let Some(message) = update.message {
            guard.job.message = message;
        }
        if let Some(result) = update.result {
            guard.job.result = Some(result);
        }
        if next == JobState::Completed {
            guard.job.percent = 100;
        }
        if next.is_terminal() {
            guard.job.finished_at = Some(Utc::now());
        }

        Ok(guard.job.clone())
    }

    /// Applies a progress tick to a Running job.
    pub async fn record_progress(&self, id: &str, percent: u8, message: String) -> AppResult<Job> {
        self.transition(
            id,
            JobState::Running,
            JobUpdate {
                percent: Some(percent),
                message: Some(message),
                result: None,
            },
        )
        .await
    }

    /// Marks the job Completed with its bundle handle.
    pub async fn complete(&self, id: &str, bundle: crate::job::BundleHandle) -> AppResult<Job> {
        self.transition(
            id,
            JobState::Completed,
            JobUpdate {
                percent: Some(100),
                message: Some("packaged".to_string()),
                result: Some(JobOutcome::Bundle(bundle)),
            },
        )
        .await
    }

    /// Marks the job Failed with a reason.
    pub async fn fail(&self, id: &str, reason: String) -> AppResult<Job> {
        self.transition(
            id,
            JobState::Failed,
            JobUpdate {
                percent: None,
                message: Some(reason.clone()),
                result: Some(JobOutcome::Error { reason }),
            },
        )
        .await
    }

    /// Marks the job Cancelled.
    pub async fn cancel(&self, id: &str) -> AppResult<Job> {
        self.transition(
            id,
            JobState::Cancelled,
            JobUpdate {
                percent: None,
                message: Some("cancelled".to_string()),
                result: None,
            },
        )
        .await
    }

    /// Removes a job from the store.
    ///
    /// # Returns
    ///
    /// `true` when an entry was removed.
    pub fn evict(&self, id: &str) -> bool {
        self.jobs.remove(id).is_some()
    }

    /// Removes terminal jobs whose terminal transition is older than
    /// `retention`. Non-terminal jobs are never touched.
    ///
    /// # Returns
    ///
    /// The ids of the evicted jobs.
    pub fn evict_finished(&self, retention: chrono::Duration) -> Vec<String> {
        let cutoff = Utc::now() - retention;
        let mut stale = Vec::new();
        for entry in self.jobs.iter() {
            // try_lock: a held lock means the job is being mutated right
            // now, so it is certainly not stale enough to evict.
            if let Ok(guard) = entry.value().try_lock() {
                if let Some(finished) = guard.job.finished_at {
                    if finished <= cutoff {
                        stale.push(entry.key().clone());
                    }
                }
            }
        }
        for id in &stale {
            self.jobs.remove(id);
        }
        stale
    }

    /// Current number of stored jobs (all states).
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// True when no jobs are stored.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn entry(&self, id: &str) -> AppResult<Arc<Mutex<JobEntry>>> {
        self.jobs
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }
}
