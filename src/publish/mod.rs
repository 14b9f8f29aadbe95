//! Per-job progress fan-out to subscribed client sessions.
//!
//! One multiplexer per job id, never a global broadcast: sessions register
//! a bounded event queue under the job's subscriber lock, so a session
//! added while a publish is in flight receives either that event or its
//! subscribe-time snapshot, never neither and never both.
//!
//! Delivery policy (documented, see DESIGN.md): a slow subscriber never
//! delays the others. When a subscriber's queue is full, intermediate
//! progress ticks are dropped for that subscriber only and counted in
//! metrics; terminal events fall back to a detached timed send so they
//! still land. A closed queue means the session went away and it is
//! unsubscribed silently.

use crate::core::{config, metrics};
use crate::job::{Job, JobEvent};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// Opaque client session identifier.
pub type SessionId = String;

/// One registered session: its id and the sending half of its event queue.
struct Subscriber {
    session: SessionId,
    tx: mpsc::Sender<JobEvent>,
}

/// Fan-out point for job progress events.
pub struct ProgressPublisher {
    subscribers: DashMap<String, Arc<Mutex<Vec<Subscriber>>>>,
    capacity: usize,
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new(config::orchestrator::SUBSCRIBER_QUEUE_CAPACITY)
    }
}

impl ProgressPublisher {
    /// Creates a publisher whose subscriber queues hold `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Registers `session` for `job_id` events and delivers the given
    /// snapshot into its queue before any later tick.
    ///
    /// A snapshot of a job already in a terminal state is delivered
    /// without registering: the stream yields the snapshot and closes,
    /// since no further events can follow.
    ///
    /// Re-subscribing an existing session id replaces its previous queue.
    ///
    /// # Returns
    ///
    /// The receiving half of the session's event queue.
    pub async fn subscribe(&self, job_id: &str, session: SessionId, snapshot: Job) -> mpsc::Receiver<JobEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);

        if snapshot.state.is_terminal() {
            // Queue the snapshot and drop the sender: the receiver sees
            // the final state, then end-of-stream.
            let _ = tx.try_send(JobEvent::Snapshot { job: snapshot });
            return rx;
        }

        let list = self
            .subscribers
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone();

        let mut guard = list.lock().await;
        // Snapshot first, under the lock: no tick can interleave before it.
        // A fresh queue always has room for one event.
        let _ = tx.try_send(JobEvent::Snapshot { job: snapshot });

        if let Some(existing) = guard.iter_mut().find(|s| s.session == session) {
            log::debug!("Session {} re-subscribed to job {}", session, job_id);
            existing.tx = tx;
        } else {
            guard.push(Subscriber { session, tx });
            metrics::JOB_SUBSCRIBERS.inc();
        }

        rx
    }

    /// Deregisters `session` from `job_id`. Unknown pairs are a no-op.
    pub async fn unsubscribe(&self, job_id: &str, session: &str) {
        let Some(list) = self.subscribers.get(job_id).map(|e| Arc::clone(e.value())) else {
            return;
        };
        let mut guard = list.lock().await;
        let before = guard.len();
        guard.retain(|s| s.session != session);
        let removed = before - guard.len();
        if removed > 0 {
            metrics::JOB_SUBSCRIBERS.sub(removed as f64);
            log::debug!("Session {} unsubscribed from job {}", session, job_id);
        }
    }

    /// Delivers an intermediate event to every subscriber of `job_id`.
    ///
    /// Full queues drop the event for that subscriber; closed queues
    /// unsubscribe the session silently.
    pub async fn publish(&self, job_id: &str, event: JobEvent) {
        let Some(list) = self.subscribers.get(job_id).map(|e| Arc::clone(e.value())) else {
            return;
        };
        let mut guard = list.lock().await;
        let mut closed = 0usize;
        guard.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => {
                metrics::PROGRESS_EVENTS_PUBLISHED_TOTAL.inc();
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::PROGRESS_EVENTS_DROPPED_TOTAL.inc();
                log::debug!("Dropping tick for slow subscriber {} on job {}", sub.session, job_id);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                closed += 1;
                false
            }
        });
        if closed > 0 {
            metrics::JOB_SUBSCRIBERS.sub(closed as f64);
        }
    }

    /// Delivers a terminal event and tears down the job's subscriber set.
    ///
    /// The terminal event is the last event any subscriber receives for
    /// the job: the set is removed afterwards, so nothing can follow it.
    /// A full queue gets a detached, time-bounded send so a slow reader
    /// still observes the terminal state without stalling anyone else.
    pub async fn publish_terminal(&self, job_id: &str, event: JobEvent) {
        let Some((_, list)) = self.subscribers.remove(job_id) else {
            return;
        };
        let mut guard = list.lock().await;
        let subs = std::mem::take(&mut *guard);
        drop(guard);

        let count = subs.len();
        for sub in subs {
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {
                    metrics::PROGRESS_EVENTS_PUBLISHED_TOTAL.inc();
                }
                Err(mpsc::error::TrySendError::Full(ev)) => {
                    // Bounded grace period; the subscriber set is already
                    // gone, so no event can arrive after this one.
                    let session = sub.session.clone();
                    let job = job_id.to_string();
                    let tx = sub.tx.clone();
                    tokio::spawn(async move {
                        let timeout = config::orchestrator::terminal_send_timeout();
                        match tokio::time::timeout(timeout, tx.send(ev)).await {
                            Ok(Ok(())) => metrics::PROGRESS_EVENTS_PUBLISHED_TOTAL.inc(),
                            _ => {
                                metrics::PROGRESS_EVENTS_DROPPED_TOTAL.inc();
                                log::warn!("Terminal event for job {} not delivered to slow session {}", job, session);
                            }
                        }
                    });
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        if count > 0 {
            metrics::JOB_SUBSCRIBERS.sub(count as f64);
        }
    }

    /// Drops the subscriber set for a job without publishing anything.
    /// Used when a job is evicted.
    pub fn remove_job(&self, job_id: &str) {
        if let Some((_, list)) = self.subscribers.remove(job_id) {
            if let Ok(guard) = list.try_lock() {
                metrics::JOB_SUBSCRIBERS.sub(guard.len() as f64);
            }
        }
    }

    /// Number of sessions currently subscribed to `job_id`.
    pub async fn subscriber_count(&self, job_id: &str) -> usize {
        match self.subscribers.get(job_id).map(|e| Arc::clone(e.value())) {
            Some(list) => list.lock().await.len(),
            None => 0,
        }
    }
}
