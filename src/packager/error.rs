use std::fmt;

/// Structured error type for packaging operations.
///
/// Categorized variants instead of a bare string so failures can be
/// bucketed for metrics and mapped to user-facing reasons.
#[derive(Debug)]
pub enum PackagingError {
    /// Requested mod is not in the catalog
    UnknownMod(String),
    /// Catalog entry resolved but its file is missing or has no source
    MissingFile(String),
    /// HTTP fetch failed after retries
    Fetch(String),
    /// Writing the bundle archive failed
    Archive(String),
    /// Filesystem failure while staging files
    Io(String),
    /// The job's cancellation token fired
    Cancelled,
    /// Catch-all for uncategorized errors
    Other(String),
}

impl fmt::Display for PackagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackagingError::UnknownMod(name) => write!(f, "mod not in catalog: {}", name),
            PackagingError::MissingFile(msg) => write!(f, "{}", msg),
            PackagingError::Fetch(msg) => write!(f, "{}", msg),
            PackagingError::Archive(msg) => write!(f, "{}", msg),
            PackagingError::Io(msg) => write!(f, "{}", msg),
            PackagingError::Cancelled => write!(f, "cancelled"),
            PackagingError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for PackagingError {}

impl PackagingError {
    /// Returns subcategory for metrics
    pub fn subcategory(&self) -> &'static str {
        match self {
            PackagingError::UnknownMod(_) => "unknown_mod",
            PackagingError::MissingFile(_) => "missing_file",
            PackagingError::Fetch(_) => "fetch",
            PackagingError::Archive(_) => "archive",
            PackagingError::Io(_) => "io",
            PackagingError::Cancelled => "cancelled",
            PackagingError::Other(_) => "other",
        }
    }

    /// True when the error came from cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PackagingError::Cancelled)
    }
}

impl From<std::io::Error> for PackagingError {
    fn from(err: std::io::Error) -> Self {
        PackagingError::Io(err.to_string())
    }
}
