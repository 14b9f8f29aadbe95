//! Bundle job model: lifecycle states, snapshots, and the events
//! published to subscribed client sessions.

pub mod store;

pub use store::JobStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a bundle job.
///
/// `Completed`, `Failed`, and `Cancelled` are terminal: no further
/// transitions are accepted from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, packager not yet scheduled
    Pending,
    /// Packager executing, progress ticks flowing
    Running,
    /// Bundle assembled, result available
    Completed,
    /// Packager reported a failure
    Failed,
    /// Stopped on client request
    Cancelled,
}

impl JobState {
    /// Whether this state accepts no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    /// Whether a transition from `self` to `next` is legal.
    ///
    /// `Running -> Running` is the progress-tick case: percent/message
    /// updates while the packager executes.
    pub fn can_transition_to(self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Pending, JobState::Running) => true,
            (JobState::Pending, JobState::Cancelled) => true,
            (JobState::Running, JobState::Running) => true,
            (JobState::Running, JobState::Completed) => true,
            (JobState::Running, JobState::Failed) => true,
            (JobState::Running, JobState::Cancelled) => true,
            _ => false,
        }
    }

    /// Stable string form, used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client request describing which catalog mods go into a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleSpec {
    /// Catalog keys to include: numeric mod ids or exact mod names
    pub mods: Vec<String>,
    /// Optional label used for the archive file name
    #[serde(default)]
    pub name: Option<String>,
}

impl BundleSpec {
    /// Creates a spec for the given catalog keys.
    pub fn new<I, S>(mods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mods: mods.into_iter().map(Into::into).collect(),
            name: None,
        }
    }

    /// File-name-safe label for the assembled archive.
    pub fn label(&self) -> String {
        let raw = self.name.as_deref().unwrap_or("bundle");
        let slug: String = raw
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        let trimmed = slug.trim_matches('-');
        if trimmed.is_empty() {
            "bundle".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

/// Location and shape of a finished bundle archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleHandle {
    /// Path of the archive on disk
    pub archive_path: String,
    /// Archive size in bytes
    pub size_bytes: u64,
    /// Number of mod files included
    pub mod_count: usize,
}

/// Terminal outcome recorded on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Bundle assembled successfully
    Bundle(BundleHandle),
    /// Packaging failed with the given reason
    Error { reason: String },
}

/// A bundle job and its current state.
///
/// The store hands out clones of this struct as consistent snapshots;
/// `percent` and `message` always belong to the same update.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    /// Unique job identifier (UUID), never reused
    pub id: String,
    /// The originating request
    pub spec: BundleSpec,
    /// Current lifecycle state
    pub state: JobState,
    /// Progress in percent, non-decreasing while Running
    pub percent: u8,
    /// Human-readable current-step description, replaced on each update
    pub message: String,
    /// Terminal outcome, present only in Completed or Failed
    pub result: Option<JobOutcome>,
    /// Job creation timestamp
    pub created_at: DateTime<Utc>,
    /// Timestamp of the terminal transition, used by the eviction sweep
    pub finished_at: Option<DateTime<Utc>>,
}

/// Event published to sessions subscribed to a job.
///
/// `Snapshot` is delivered once, immediately on subscribe; the terminal
/// variants are always the last event a subscriber receives for a job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// Full current state, sent to a newly added subscriber
    Snapshot {
        /// The job snapshot at subscribe time
        job: Job,
    },
    /// Intermediate progress tick
    Progress {
        /// Progress in percent (0-100)
        percent: u8,
        /// Current-step description
        message: String,
    },
    /// Terminal: bundle assembled
    Completed {
        /// The finished bundle
        bundle: BundleHandle,
    },
    /// Terminal: packaging failed
    Failed {
        /// Failure reason for display
        reason: String,
    },
    /// Terminal: stopped on client request
    Cancelled,
}

impl JobEvent {
    /// Whether this event ends the stream for its job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Failed { .. } | JobEvent::Cancelled)
    }

    /// Event name used for SSE event types and logs.
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Snapshot { .. } => "snapshot",
            JobEvent::Progress { .. } => "progress",
            JobEvent::Completed { .. } => "completed",
            JobEvent::Failed { .. } => "failed",
            JobEvent::Cancelled => "cancelled",
        }
    }
}

/// Field update applied together with a state transition.
///
/// `percent` is clamped monotonic by the store; `message` replaces the
/// previous one when present.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    /// New percent value, if the update carries one
    pub percent: Option<u8>,
    /// New current-step message, if the update carries one
    pub message: Option<String>,
    /// Terminal outcome, for Completed/Failed transitions
    pub result: Option<JobOutcome>,
}
