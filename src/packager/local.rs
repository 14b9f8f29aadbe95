//! LocalPackager — assembles bundles from a local mods directory.
//!
//! The straightforward strategy for a depot that already mirrors every
//! catalog file on disk: resolve the requested mods, verify each file
//! exists under the mods directory, and write them into one zip archive.
//! No network involved, so the only failure modes are catalog misses and
//! filesystem errors.

use crate::job::BundleSpec;
use crate::packager::{
    archive_file_name, ensure_dir, report, staging_percent, write_bundle_archive, BundleOutput, ModCatalog,
    PackProgress, Packager, PackagingError,
};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Packaging strategy that stages mod archives from a local directory.
pub struct LocalPackager {
    catalog: Arc<ModCatalog>,
    mods_dir: PathBuf,
    bundle_dir: PathBuf,
}

impl LocalPackager {
    /// Creates a local packager over the given catalog and directories.
    pub fn new(catalog: Arc<ModCatalog>, mods_dir: PathBuf, bundle_dir: PathBuf) -> Self {
        Self {
            catalog,
            mods_dir,
            bundle_dir,
        }
    }
}

#[async_trait]
impl Packager for LocalPackager {
    fn name(&self) -> &str {
        "local"
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

        let mut staged = Vec::with_capacity(total);
        for (i, entry) in entries.iter().enumerate() {
            if cancel.is_cancelled() {
                log::info!("Local packaging cancelled after {} of {} mods", i, total);
                return Err(PackagingError::Cancelled);
            }

            let path = self.mods_dir.join(&entry.file_name);
            if !path.is_file() {
                return Err(PackagingError::MissingFile(format!(
                    "{} not found under {}",
                    entry.file_name,
                    self.mods_dir.display()
                )));
            }
            staged.push((entry.file_name.clone(), path));
            report(&progress, staging_percent(i, total), format!("bundling {}", entry.name));
        }

        if cancel.is_cancelled() {
            return Err(PackagingError::Cancelled);
        }

        let dest = self.bundle_dir.join(archive_file_name(spec));
        let size_bytes = write_bundle_archive(staged, dest.clone()).await?;
        report(&progress, 100, "packaged");

        log::info!(
            "Bundled {} mods into {} ({} bytes)",
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
