//! Pluggable bundle packaging backends.
//!
//! Provides the `Packager` trait for implementing packaging strategies and
//! the shared archive writer both built-in strategies use. A packager
//! assembles one bundle per call, reporting progress through a channel
//! owned by the orchestrator; it never touches the job store or the
//! publisher, so strategies can be swapped or tested without any
//! orchestration concerns.
//!
//! Built-in strategies:
//! - `LocalPackager` — stages mod archives from a local mods directory
//! - `FetchPackager` — downloads mod archives over HTTP, with retries

pub mod catalog;
pub mod error;
pub mod fetch;
pub mod local;

pub use catalog::{ModCatalog, ModEntry};
pub use error::PackagingError;
pub use fetch::FetchPackager;
pub use local::LocalPackager;

use crate::job::{BundleHandle, BundleSpec};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Progress tick emitted by a packager while it assembles a bundle.
#[derive(Debug, Clone)]
pub struct PackProgress {
    /// Progress in percent (0-100)
    pub percent: u8,
    /// Current-step description
    pub message: String,
}

/// Output of a successful packaging run.
#[derive(Debug, Clone)]
pub struct BundleOutput {
    /// Path of the assembled archive
    pub archive_path: PathBuf,
    /// Archive size in bytes
    pub size_bytes: u64,
    /// Number of mod files included
    pub mod_count: usize,
}

impl BundleOutput {
    /// Convert to the job-facing handle recorded on a Completed job.
    pub fn to_handle(&self) -> BundleHandle {
        BundleHandle {
            archive_path: self.archive_path.to_string_lossy().into_owned(),
            size_bytes: self.size_bytes,
            mod_count: self.mod_count,
        }
    }
}

/// Trait for packaging strategy implementations.
///
/// `run` assembles the bundle described by `spec`, sending progress
/// updates through `progress` at its own cadence: at least once near the
/// start and once at 100% before returning. Silence is tolerated; the
/// return value alone decides the job's terminal state. Implementations
/// must observe `cancel` between steps and return
/// `PackagingError::Cancelled` promptly once it fires.
#[async_trait]
pub trait Packager: Send + Sync {
    /// Human-readable strategy name (e.g. "local", "fetch")
    fn name(&self) -> &str;

    /// Assemble one bundle.
    async fn run(
        &self,
        spec: &BundleSpec,
        progress: mpsc::UnboundedSender<PackProgress>,
        cancel: CancellationToken,
    ) -> Result<BundleOutput, PackagingError>;
}

/// Sends a progress tick, ignoring a closed channel.
///
/// The receiver disappears only when the supervising task is gone; the
/// packager keeps going and lets its return value settle the job.
pub(crate) fn report(progress: &mpsc::UnboundedSender<PackProgress>, percent: u8, message: impl Into<String>) {
    let _ = progress.send(PackProgress {
        percent,
        message: message.into(),
    });
}

/// Writes the staged files into a single zip archive at `dest`.
///
/// Runs on the blocking thread pool; zip IO is synchronous. Entry names
/// are the archive-internal file names, staged paths are where the bytes
/// currently live.
pub(crate) async fn write_bundle_archive(
    staged: Vec<(String, PathBuf)>,
    dest: PathBuf,
) -> Result<u64, PackagingError> {
    let task = tokio::task::spawn_blocking(move || -> Result<u64, PackagingError> {
        use zip::write::SimpleFileOptions;

        let file = std::fs::File::create(&dest)
            .map_err(|e| PackagingError::Archive(format!("cannot create {}: {}", dest.display(), e)))?;
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for (entry_name, path) in &staged {
            writer
                .start_file(entry_name.clone(), options)
                .map_err(|e| PackagingError::Archive(format!("cannot add {}: {}", entry_name, e)))?;
            let mut src = std::fs::File::open(path)
                .map_err(|e| PackagingError::Io(format!("cannot open {}: {}", path.display(), e)))?;
            std::io::copy(&mut src, &mut writer)
                .map_err(|e| PackagingError::Archive(format!("cannot write {}: {}", entry_name, e)))?;
        }

        writer
            .finish()
            .map_err(|e| PackagingError::Archive(format!("cannot finalize archive: {}", e)))?;

        let size = std::fs::metadata(&dest).map(|m| m.len()).unwrap_or(0);
        Ok(size)
    });

    match task.await {
        Ok(result) => result,
        Err(e) => Err(PackagingError::Archive(format!("archive task failed: {}", e))),
    }
}

/// Archive file name for a bundle: label plus a short unique suffix.
pub(crate) fn archive_file_name(spec: &BundleSpec) -> String {
    let suffix = uuid::Uuid::new_v4().to_string();
    format!("{}-{}.zip", spec.label(), &suffix[..8])
}

/// Percent for finishing file `index` of `total`, scaled into the staging
/// window (0-90); the final 10% belongs to the archive step.
pub(crate) fn staging_percent(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 90;
    }
    (((index + 1) * 90) / total).min(90) as u8
}

/// Ensures a directory exists.
pub(crate) fn ensure_dir(dir: &Path) -> Result<(), PackagingError> {
    std::fs::create_dir_all(dir).map_err(|e| PackagingError::Io(format!("cannot create {}: {}", dir.display(), e)))
}
