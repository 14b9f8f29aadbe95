//! Job orchestration: accepts bundle requests, supervises packager
//! execution, and mediates between packager output and event delivery.
//!
//! One supervision task per job. The packager reports through an mpsc
//! channel; the supervisor forwards each tick into the job store and,
//! only when the store accepted it, to the publisher. Store update and
//! publish are one logical step: a tick rejected by the store (job was
//! cancelled concurrently) is dropped unpublished.

use crate::core::error::{AppError, AppResult};
use crate::core::{config, metrics};
use crate::job::{BundleSpec, Job, JobEvent, JobOutcome, JobState, JobStore, JobUpdate};
use crate::packager::{PackProgress, Packager, PackagingError};
use crate::publish::{ProgressPublisher, SessionId};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// Public entry point for bundle download jobs.
///
/// Owns the job store and the publisher; holds the packaging strategy as
/// a trait object so strategies stay swappable and testable.
pub struct Orchestrator {
    store: JobStore,
    publisher: ProgressPublisher,
    packager: Arc<dyn Packager>,
    permits: Arc<Semaphore>,
}

impl Orchestrator {
    /// Creates an orchestrator around a packaging strategy.
    pub fn new(packager: Arc<dyn Packager>) -> Arc<Self> {
        Arc::new(Self {
            store: JobStore::new(),
            publisher: ProgressPublisher::default(),
            packager,
            permits: Arc::new(Semaphore::new(config::orchestrator::MAX_CONCURRENT_JOBS)),
        })
    }

    /// Starts a bundle job.
    ///
    /// Validates the spec synchronously, creates the job, moves it to
    /// Running, and schedules the packager without blocking. The id is
    /// returned before any event can be published, so a caller can always
    /// subscribe in time for the first tick.
    ///
    /// # Errors
    ///
    /// `AppError::Validation` for an empty mod list. Packaging failures
    /// are never surfaced here; they arrive as a Failed terminal event.
    pub async fn start(self: &Arc<Self>, spec: BundleSpec) -> AppResult<String> {
        if spec.mods.is_empty() {
            return Err(AppError::Validation("bundle spec has no mods".to_string()));
        }

        let job = self.store.create(spec);
        let id = job.id.clone();
        self.store
            .transition(
                &id,
                JobState::Running,
                JobUpdate {
                    percent: None,
                    message: Some("starting".to_string()),
                    result: None,
                },
            )
            .await?;
        metrics::job_started();
        log::info!("Job {} started ({} mods, strategy: {})", id, job.spec.mods.len(), self.packager.name());

        let orchestrator = Arc::clone(self);
        let task_id = id.clone();
        tokio::spawn(async move {
            orchestrator.supervise(task_id).await;
        });

        Ok(id)
    }

    /// Cancels a Pending or Running job.
    ///
    /// The terminal state is recorded and published immediately; the
    /// packager is signalled and may take a prompt but unbounded time to
    /// actually stop. Its eventual return is ignored by the supervisor.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids, `InvalidTransition` from terminal
    /// states (job state and result left untouched).
    pub async fn cancel(&self, id: &str) -> AppResult<Job> {
        let token = self.store.cancel_token(id).await?;
        let snapshot = self.store.cancel(id).await?;
        token.cancel();

        let started = snapshot.created_at;
        self.publisher.publish_terminal(id, JobEvent::Cancelled).await;
        metrics::job_cancelled(elapsed_secs(started));
        log::info!("Job {} cancelled at {}%", id, snapshot.percent);
        Ok(snapshot)
    }

    /// Subscribes a session to a job's progress events.
    ///
    /// The current snapshot is delivered into the returned channel before
    /// any subsequent tick, so late subscribers see the latest percent
    /// immediately rather than waiting for the next update.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or evicted ids; nothing is registered.
    pub async fn subscribe(&self, id: &str, session: SessionId) -> AppResult<mpsc::Receiver<JobEvent>> {
        let snapshot = self.store.get(id).await?;
        let rx = self.publisher.subscribe(id, session, snapshot).await;

        // A terminal transition can race the registration above; its
        // terminal publish would then predate the new session, which
        // would wait forever. Re-check and close the loop with the
        // stored outcome (publish_terminal is a no-op for whichever
        // side loses the race, so no session sees it twice).
        if let Ok(job) = self.store.get(id).await {
            if job.state.is_terminal() {
                if let Some(event) = terminal_event(&job) {
                    self.publisher.publish_terminal(id, event).await;
                }
            }
        }
        Ok(rx)
    }

    /// Removes a session's subscription to a job.
    pub async fn unsubscribe(&self, id: &str, session: &str) {
        self.publisher.unsubscribe(id, session).await;
    }

    /// Returns the job's current snapshot.
    pub async fn get(&self, id: &str) -> AppResult<Job> {
        self.store.get(id).await
    }

    /// Spawns the background sweep that evicts terminal jobs after the
    /// retention window.
    pub fn start_eviction_sweep(self: &Arc<Self>) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config::orchestrator::sweep_interval());
            log::info!(
                "Eviction sweep started (interval: {}s, retention: {}s)",
                config::orchestrator::SWEEP_INTERVAL_SECS,
                config::orchestrator::RETENTION_SECS
            );
            loop {
                ticker.tick().await;
                let evicted = orchestrator.store.evict_finished(config::orchestrator::retention());
                if !evicted.is_empty() {
                    // Subscriber sets are normally gone by terminal publish;
                    // this covers sessions left behind by manual eviction.
                    for id in &evicted {
                        orchestrator.publisher.remove_job(id);
                    }
                    metrics::JOBS_EVICTED_TOTAL.inc_by(evicted.len() as f64);
                    log::info!("Evicted {} finished job(s)", evicted.len());
                }
            }
        });
    }

    /// Runs one job to its terminal state.
    async fn supervise(self: Arc<Self>, id: String) {
        // Bounded packager concurrency; a closed semaphore cannot happen
        // but is treated as "no limit" rather than a crash.
        let _permit = Arc::clone(&self.permits).acquire_owned().await.ok();

        let (job, cancel) = match (self.store.get(&id).await, self.store.cancel_token(&id).await) {
            (Ok(job), Ok(cancel)) => (job, cancel),
            _ => {
                log::warn!("Job {} vanished before supervision started", id);
                return;
            }
        };
        let started = job.created_at;

        let (tx, mut rx) = mpsc::unbounded_channel::<PackProgress>();
        let packager = Arc::clone(&self.packager);
        let spec = job.spec.clone();
        let packager_cancel = cancel.clone();
        let packager_task = tokio::spawn(async move { packager.run(&spec, tx, packager_cancel).await });

        // Forward ticks until the packager drops its sender
        while let Some(tick) = rx.recv().await {
            match self.store.record_progress(&id, tick.percent, tick.message.clone()).await {
                Ok(snapshot) => {
                    self.publisher
                        .publish(
                            &id,
                            JobEvent::Progress {
                                percent: snapshot.percent,
                                message: snapshot.message,
                            },
                        )
                        .await;
                }
                Err(AppError::InvalidTransition { .. }) => {
                    // Cancelled concurrently: drop the tick unpublished
                    log::debug!("Dropping tick for job {} after terminal transition", id);
                }
                Err(e) => {
                    log::warn!("Job {} store update failed: {}", id, e);
                    break;
                }
            }
        }

        let result = match packager_task.await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Packager task for job {} panicked: {}", id, e);
                Err(PackagingError::Other("packager task failed".to_string()))
            }
        };

        match result {
            Ok(output) => {
                let handle = output.to_handle();
                match self.store.complete(&id, handle.clone()).await {
                    Ok(_) => {
                        self.publisher
                            .publish_terminal(&id, JobEvent::Completed { bundle: handle })
                            .await;
                        metrics::job_completed(elapsed_secs(started), output.size_bytes);
                        log::info!("Job {} completed: {}", id, output.archive_path.display());
                    }
                    Err(_) => {
                        // Cancelled during the final stretch: the archive
                        // has no owner anymore, remove it.
                        log::info!("Job {} finished after cancellation, discarding archive", id);
                        if let Err(e) = std::fs::remove_file(&output.archive_path) {
                            log::warn!("Failed to remove orphan archive {}: {}", output.archive_path.display(), e);
                        }
                    }
                }
            }
            Err(ref e) if e.is_cancelled() => {
                // cancel() already recorded and published the terminal
                // state; this is just the packager winding down.
                log::debug!("Packager for job {} stopped after cancellation", id);
            }
            Err(e) => {
                let reason = e.to_string();
                match self.store.fail(&id, reason.clone()).await {
                    Ok(_) => {
                        self.publisher.publish_terminal(&id, JobEvent::Failed { reason }).await;
                        metrics::job_failed(e.subcategory(), elapsed_secs(started));
                        log::warn!("Job {} failed: {}", id, e);
                    }
                    Err(_) => {
                        log::debug!("Job {} failed after cancellation: {}", id, e);
                    }
                }
            }
        }
    }
}

/// Seconds elapsed since a job's creation timestamp.
fn elapsed_secs(created_at: chrono::DateTime<chrono::Utc>) -> f64 {
    let millis = (chrono::Utc::now() - created_at).num_milliseconds();
    (millis.max(0) as f64) / 1000.0
}

/// Rebuilds the terminal event matching a terminal job snapshot.
fn terminal_event(job: &Job) -> Option<JobEvent> {
    match (job.state, &job.result) {
        (JobState::Completed, Some(JobOutcome::Bundle(bundle))) => Some(JobEvent::Completed {
            bundle: bundle.clone(),
        }),
        (JobState::Failed, Some(JobOutcome::Error { reason })) => Some(JobEvent::Failed {
            reason: reason.clone(),
        }),
        (JobState::Cancelled, _) => Some(JobEvent::Cancelled),
        _ => None,
    }
}
