use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Configuration constants for the service
/// Path to the mod catalog JSON file
/// Read once at startup from CATALOG_PATH environment variable
/// Default: catalog.json in the working directory
pub static CATALOG_PATH: Lazy<String> =
    Lazy::new(|| env::var("CATALOG_PATH").unwrap_or_else(|_| "catalog.json".to_string()));

/// Directory holding the distributable mod archives referenced by the catalog
/// Read from MODS_DIR environment variable
/// Supports tilde (~) expansion for home directory
pub static MODS_DIR: Lazy<String> = Lazy::new(|| env::var("MODS_DIR").unwrap_or_else(|_| "~/mods".to_string()));

/// Output directory for assembled bundle archives
/// Read from BUNDLE_DIR environment variable
/// Default: /tmp/moddepot-bundles
pub static BUNDLE_DIR: Lazy<String> =
    Lazy::new(|| env::var("BUNDLE_DIR").unwrap_or_else(|_| "/tmp/moddepot-bundles".to_string()));

/// Packaging strategy: "local" (copy from MODS_DIR) or "fetch" (download over HTTP)
/// Read from PACKAGER_STRATEGY environment variable
pub static PACKAGER_STRATEGY: Lazy<String> =
    Lazy::new(|| env::var("PACKAGER_STRATEGY").unwrap_or_else(|_| "local".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: moddepot.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "moddepot.log".to_string()));

/// Port for the public API server
/// Read from WEB_PORT environment variable, default 3000
pub static WEB_PORT: Lazy<u16> = Lazy::new(|| {
    env::var("WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000)
});

/// Port for the Prometheus metrics server
/// Read from METRICS_PORT environment variable, default 9090
pub static METRICS_PORT: Lazy<u16> = Lazy::new(|| {
    env::var("METRICS_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(9090)
});

/// Expands a leading tilde in a configured path to the user's home directory.
pub fn expand_path(path: &str) -> String {
    shellexpand::tilde(path).to_string()
}

/// Orchestrator tunables
pub mod orchestrator {
    use super::Duration;

    /// Maximum number of packager tasks running at once.
    /// Additional started jobs hold in Running state until a slot frees up.
    pub const MAX_CONCURRENT_JOBS: usize = 4;

    /// Capacity of each subscriber's event queue. Intermediate progress
    /// ticks are dropped for a subscriber whose queue is full.
    pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 32;

    /// How long a terminal job is kept around before the sweep evicts it (seconds)
    pub const RETENTION_SECS: u64 = 600;

    /// Interval between eviction sweep runs (seconds)
    pub const SWEEP_INTERVAL_SECS: u64 = 60;

    /// Upper bound on delivering a terminal event to a slow subscriber (milliseconds)
    pub const TERMINAL_SEND_TIMEOUT_MS: u64 = 5000;

    /// Retention window duration
    pub fn retention() -> chrono::Duration {
        chrono::Duration::seconds(RETENTION_SECS as i64)
    }

    /// Sweep interval duration
    pub fn sweep_interval() -> Duration {
        Duration::from_secs(SWEEP_INTERVAL_SECS)
    }

    /// Terminal delivery timeout duration
    pub fn terminal_send_timeout() -> Duration {
        Duration::from_millis(TERMINAL_SEND_TIMEOUT_MS)
    }
}

/// Fetch packaging strategy tunables
pub mod fetch {
    use super::Duration;

    /// Connect timeout for mod file downloads (seconds)
    pub const CONNECT_TIMEOUT_SECS: u64 = 30;

    /// Overall request timeout per mod file (seconds)
    pub const REQUEST_TIMEOUT_SECS: u64 = 600;

    /// Retries per mod file after the initial attempt
    pub const MAX_RETRIES: u32 = 2;

    /// Initial backoff delay before the first retry (milliseconds)
    pub const RETRY_INITIAL_DELAY_MS: u64 = 2000;

    /// Cap on the exponential backoff delay (seconds)
    pub const RETRY_MAX_DELAY_SECS: u64 = 30;

    /// Connect timeout duration
    pub fn connect_timeout() -> Duration {
        Duration::from_secs(CONNECT_TIMEOUT_SECS)
    }

    /// Request timeout duration
    pub fn request_timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }

    /// Backoff delay for the given retry attempt (0-based), doubling each
    /// time and capped at `RETRY_MAX_DELAY_SECS`.
    pub fn backoff_delay(attempt: u32) -> Duration {
        let base = RETRY_INITIAL_DELAY_MS.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(base.min(RETRY_MAX_DELAY_SECS * 1000))
    }
}
