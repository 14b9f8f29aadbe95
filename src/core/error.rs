use crate::job::JobState;
use crate::packager::PackagingError;
use thiserror::Error;

/// Centralized error types for the application
///
/// All errors in the application are converted to this enum for consistent
/// error handling. Uses `thiserror` for automatic conversion and display
/// formatting.
#[derive(Error, Debug)]
pub enum AppError {
    /// Operation referenced an unknown or already evicted job id
    #[error("unknown job: {0}")]
    NotFound(String),

    /// Requested state change is illegal from the job's current state
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// State the job is currently in
        from: JobState,
        /// State the caller asked for
        to: JobState,
    },

    /// Packaging errors (resolve, fetch, archive)
    #[error("packaging error: {0}")]
    Packaging(#[from] PackagingError),

    /// Catalog loading or validation errors
    #[error("catalog error: {0}")]
    Catalog(String),

    /// HTTP/Fetch errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// Request validation errors, surfaced synchronously to the caller
    #[error("validation error: {0}")]
    Validation(String),

    /// Anyhow errors (for general error handling)
    #[error("application error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// True when the error should map to a 404 at the API boundary.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}
