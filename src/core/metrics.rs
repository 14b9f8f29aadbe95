//! Metrics collection for the bundle service using Prometheus
//!
//! This module provides a centralized metrics registry for tracking:
//! - Performance metrics (job duration, bundle size)
//! - System health metrics (failures by category, active jobs)
//! - Delivery metrics (published and dropped progress events, subscribers)

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter, CounterVec, Gauge,
    Histogram,
};

lazy_static! {
    /// Total bundle jobs accepted
    pub static ref JOBS_STARTED_TOTAL: Counter = register_counter!(
        "moddepot_jobs_started_total",
        "Total number of bundle jobs started"
    )
    .unwrap();

    /// Total jobs that reached Completed
    pub static ref JOBS_COMPLETED_TOTAL: Counter = register_counter!(
        "moddepot_jobs_completed_total",
        "Total number of bundle jobs completed successfully"
    )
    .unwrap();

    /// Total jobs that reached Failed
    /// Labels: reason (packaging error subcategory)
    pub static ref JOBS_FAILED_TOTAL: CounterVec = register_counter_vec!(
        "moddepot_jobs_failed_total",
        "Total number of bundle jobs that failed",
        &["reason"]
    )
    .unwrap();

    /// Total jobs cancelled by a client
    pub static ref JOBS_CANCELLED_TOTAL: Counter = register_counter!(
        "moddepot_jobs_cancelled_total",
        "Total number of bundle jobs cancelled"
    )
    .unwrap();

    /// Time from job start to terminal state
    pub static ref JOB_DURATION_SECONDS: Histogram = register_histogram!(
        "moddepot_job_duration_seconds",
        "Time from job start to terminal state",
        vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    )
    .unwrap();

    /// Size of finished bundle archives
    pub static ref BUNDLE_SIZE_BYTES: Histogram = register_histogram!(
        "moddepot_bundle_size_bytes",
        "Size of finished bundle archives in bytes",
        prometheus::exponential_buckets(1024.0 * 1024.0, 4.0, 8).unwrap()
    )
    .unwrap();

    /// Jobs currently in a non-terminal state
    pub static ref ACTIVE_JOBS: Gauge = register_gauge!(
        "moddepot_active_jobs",
        "Number of jobs currently pending or running"
    )
    .unwrap();

    /// Live progress subscribers across all jobs
    pub static ref JOB_SUBSCRIBERS: Gauge = register_gauge!(
        "moddepot_job_subscribers",
        "Number of live progress subscribers across all jobs"
    )
    .unwrap();

    /// Progress events fanned out to subscribers
    pub static ref PROGRESS_EVENTS_PUBLISHED_TOTAL: Counter = register_counter!(
        "moddepot_progress_events_published_total",
        "Total progress events delivered to subscriber queues"
    )
    .unwrap();

    /// Progress events dropped because a subscriber queue was full
    pub static ref PROGRESS_EVENTS_DROPPED_TOTAL: Counter = register_counter!(
        "moddepot_progress_events_dropped_total",
        "Total progress events dropped due to a full subscriber queue"
    )
    .unwrap();

    /// Terminal jobs removed by the eviction sweep
    pub static ref JOBS_EVICTED_TOTAL: Counter = register_counter!(
        "moddepot_jobs_evicted_total",
        "Total terminal jobs evicted after the retention window"
    )
    .unwrap();
}

/// Record a job start.
pub fn job_started() {
    JOBS_STARTED_TOTAL.inc();
    ACTIVE_JOBS.inc();
}

/// Record a successful completion with its duration and archive size.
pub fn job_completed(duration_secs: f64, size_bytes: u64) {
    JOBS_COMPLETED_TOTAL.inc();
    JOB_DURATION_SECONDS.observe(duration_secs);
    BUNDLE_SIZE_BYTES.observe(size_bytes as f64);
    ACTIVE_JOBS.dec();
}

/// Record a failure with its packaging subcategory and duration.
pub fn job_failed(reason: &str, duration_secs: f64) {
    JOBS_FAILED_TOTAL.with_label_values(&[reason]).inc();
    JOB_DURATION_SECONDS.observe(duration_secs);
    ACTIVE_JOBS.dec();
}

/// Record a client-initiated cancellation.
pub fn job_cancelled(duration_secs: f64) {
    JOBS_CANCELLED_TOTAL.inc();
    JOB_DURATION_SECONDS.observe(duration_secs);
    ACTIVE_JOBS.dec();
}
