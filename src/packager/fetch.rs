//! FetchPackager — assembles bundles by downloading mod files over HTTP.
//!
//! For depots that do not mirror mod files locally: each catalog entry
//! carries a source URL, fetched with chunked transfer and per-chunk
//! progress. Transient fetch failures are retried with capped exponential
//! backoff (`config::fetch`); cancellation is observed between chunks so
//! a running download stops promptly.

use crate::core::config;
use crate::job::BundleSpec;
use crate::packager::{
    archive_file_name, ensure_dir, report, write_bundle_archive, BundleOutput, ModCatalog, ModEntry, PackProgress,
    Packager, PackagingError,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Packaging strategy that downloads mod archives from their source URLs.
pub struct FetchPackager {
    catalog: Arc<ModCatalog>,
    client: Client,
    bundle_dir: PathBuf,
}

impl FetchPackager {
    /// Creates a fetch packager over the given catalog.
    ///
    /// # Errors
    ///
    /// `PackagingError::Other` when the HTTP client cannot be constructed.
    pub fn new(catalog: Arc<ModCatalog>, bundle_dir: PathBuf) -> Result<Self, PackagingError> {
        let client = Client::builder()
            .user_agent(concat!("moddepot/", env!("CARGO_PKG_VERSION")))
            .timeout(config::fetch::request_timeout())
            .connect_timeout(config::fetch::connect_timeout())
            .build()
            .map_err(|e| PackagingError::Other(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            catalog,
            client,
            bundle_dir,
        })
    }

    /// Downloads one mod file, reporting progress inside its percent window.
    async fn download_file(
        &self,
        entry: &ModEntry,
        url: &str,
        dest: &Path,
        window: (u8, u8),
        progress: &mpsc::UnboundedSender<PackProgress>,
        cancel: &CancellationToken,
    ) -> Result<(), PackagingError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PackagingError::Fetch(format!("{}: {}", entry.name, e)))?
            .error_for_status()
            .map_err(|e| PackagingError::Fetch(format!("{}: {}", entry.name, e)))?;

        let total = response.content_length().or(entry.size_bytes);
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| PackagingError::Io(format!("cannot create {}: {}", dest.display(), e)))?;

        let mut downloaded: u64 = 0;
        let mut last_percent = window.0;
        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(PackagingError::Cancelled);
            }
            let chunk = chunk.map_err(|e| PackagingError::Fetch(format!("{}: {}", entry.name, e)))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| PackagingError::Io(format!("cannot write {}: {}", dest.display(), e)))?;
            downloaded += chunk.len() as u64;

            let percent = window_percent(window, downloaded, total);
            if percent > last_percent {
                last_percent = percent;
                report(progress, percent, format!("fetching {}", entry.name));
            }
        }

        file.flush()
            .await
            .map_err(|e| PackagingError::Io(format!("cannot flush {}: {}", dest.display(), e)))?;
        Ok(())
    }

    /// Downloads with retries; only fetch errors are retried.
    async fn download_with_retry(
        &self,
        entry: &ModEntry,
        url: &str,
        dest: &Path,
        window: (u8, u8),
        progress: &mpsc::UnboundedSender<PackProgress>,
        cancel: &CancellationToken,
    ) -> Result<(), PackagingError> {
        let mut attempt = 0u32;
        loop {
            match self.download_file(entry, url, dest, window, progress, cancel).await {
                Ok(()) => return Ok(()),
                Err(PackagingError::Fetch(msg)) if attempt < config::fetch::MAX_RETRIES => {
                    let delay = config::fetch::backoff_delay(attempt);
                    attempt += 1;
                    log::warn!(
                        "Fetch failed for {} (attempt {}/{}): {}. Retrying in {:?}",
                        entry.name,
                        attempt,
                        config::fetch::MAX_RETRIES,
                        msg,
                        delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(PackagingError::Cancelled),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Percent for `downloaded` of `total` bytes inside a per-mod window.
/// Unknown totals stay at the window start until the file completes.
fn window_percent(window: (u8, u8), downloaded: u64, total: Option<u64>) -> u8 {
    let (start, end) = window;
    match total {
        Some(total) if total > 0 => {
            let span = (end - start) as u64;
            let filled = (span * downloaded.min(total)) / total;
            start + filled as u8
        }
        _ => start,
    }
}

#[async_trait]
impl Packager for FetchPackager {
    fn name(&self) -> &str {
        "fetch"
    }

    async fn run(
        &self,
        spec: &BundleSpec,
        progress: mpsc::UnboundedSender<PackProgress>,
        cancel: CancellationToken,
    ) -> Result<BundleOutput, PackagingError> {
        let entries = self.catalog.resolve(&spec.mods)?;
        let total = entries.len();
        report(&progress, 0, format!("resolving {} mods", total));

        ensure_dir(&self.bundle_dir)?;
        let staging = self.bundle_dir.join(format!("staging-{}", uuid::Uuid::new_v4()));
        ensure_dir(&staging)?;

        let result = self
            .fetch_and_archive(spec, &entries, &staging, &progress, &cancel)
            .await;

        // Staging files are only inputs to the archive; drop them either way
        if let Err(e) = std::fs::remove_dir_all(&staging) {
            log::warn!("Failed to clean staging dir {}: {}", staging.display(), e);
        }

        result
    }
}

impl FetchPackager {
    async fn fetch_and_archive(
        &self,
        spec: &BundleSpec,
        entries: &[&ModEntry],
        staging: &Path,
        progress: &mpsc::UnboundedSender<PackProgress>,
        cancel: &CancellationToken,
    ) -> Result<BundleOutput, PackagingError> {
        let total = entries.len();
        let mut staged = Vec::with_capacity(total);

        for (i, entry) in entries.iter().enumerate() {
            if cancel.is_cancelled() {
                log::info!("Fetch packaging cancelled after {} of {} mods", i, total);
                return Err(PackagingError::Cancelled);
            }

            let url = entry
                .url
                .as_deref()
                .ok_or_else(|| PackagingError::MissingFile(format!("{} has no source url", entry.name)))?;
            let window = ((i * 90 / total) as u8, ((i + 1) * 90 / total) as u8);
            report(progress, window.0, format!("fetching {}", entry.name));

            let dest = staging.join(&entry.file_name);
            self.download_with_retry(entry, url, &dest, window, progress, cancel)
                .await?;
            staged.push((entry.file_name.clone(), dest));
        }

        if cancel.is_cancelled() {
            return Err(PackagingError::Cancelled);
        }

        report(progress, 90, "archiving bundle");
        let dest = self.bundle_dir.join(archive_file_name(spec));
        let size_bytes = write_bundle_archive(staged, dest.clone()).await?;
        report(progress, 100, "packaged");

        log::info!(
            "Fetched and bundled {} mods into {} ({} bytes)",
            total,
            dest.display(),
            size_bytes
        );
        Ok(BundleOutput {
            archive_path: dest,
            size_bytes,
            mod_count: total,
        })
    }
}
