use anyhow::Result;
use dotenvy::dotenv;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use moddepot::cli::{Cli, Commands};
use moddepot::core::{config, init_logger, log_startup_configuration, metrics_server};
use moddepot::job::BundleSpec;
use moddepot::packager::{FetchPackager, LocalPackager, ModCatalog, PackProgress, Packager};
use moddepot::server::start_web_server;
use moddepot::Orchestrator;

/// Main entry point for the bundle service
///
/// Parses CLI arguments and dispatches to the appropriate subcommand.
///
/// # Errors
/// Returns an error if initialization fails (logging, catalog, server bind).
#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Log panics from spawned tasks instead of dying silently
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    // Initialize logger (console + file)
    init_logger(&config::LOG_FILE_PATH)?;

    // Load environment variables from .env if present
    let _ = dotenv();

    match cli.command {
        Some(Commands::Serve { port }) => run_serve(port).await,
        Some(Commands::Bundle { mods, name, fetch }) => run_bundle(mods, name, fetch).await,
        Some(Commands::ValidateCatalog { catalog }) => run_validate_catalog(catalog),
        None => {
            log::info!("No command specified, running the service in default mode");
            run_serve(None).await
        }
    }
}

/// Loads the configured catalog.
fn load_catalog(path_override: Option<&str>) -> Result<Arc<ModCatalog>> {
    let path = match path_override {
        Some(p) => p.to_string(),
        None => config::expand_path(&config::CATALOG_PATH),
    };
    let catalog = ModCatalog::load(Path::new(&path)).map_err(|e| anyhow::anyhow!("cannot load catalog {}: {}", path, e))?;
    log::info!("Catalog '{}' loaded: {} mods", catalog.collection, catalog.len());
    Ok(Arc::new(catalog))
}

/// Builds the configured packaging strategy.
fn build_packager(catalog: Arc<ModCatalog>, fetch: bool) -> Result<Arc<dyn Packager>> {
    let bundle_dir = PathBuf::from(config::expand_path(&config::BUNDLE_DIR));
    if fetch {
        let packager = FetchPackager::new(catalog, bundle_dir)
            .map_err(|e| anyhow::anyhow!("cannot build fetch packager: {}", e))?;
        Ok(Arc::new(packager))
    } else {
        let mods_dir = PathBuf::from(config::expand_path(&config::MODS_DIR));
        Ok(Arc::new(LocalPackager::new(catalog, mods_dir, bundle_dir)))
    }
}

/// Run the bundle service: API server, metrics server, eviction sweep.
async fn run_serve(port: Option<u16>) -> Result<()> {
    log_startup_configuration();

    let catalog = load_catalog(None)?;
    let fetch = config::PACKAGER_STRATEGY.as_str() == "fetch";
    let packager = build_packager(catalog, fetch)?;

    let orchestrator = Orchestrator::new(packager);
    orchestrator.start_eviction_sweep();

    // Metrics server runs beside the API on its own port
    let metrics_port = *config::METRICS_PORT;
    tokio::spawn(async move {
        if let Err(e) = metrics_server::start_metrics_server(metrics_port).await {
            log::error!("Metrics server failed: {}", e);
        }
    });

    let web_port = port.unwrap_or(*config::WEB_PORT);
    tokio::select! {
        result = start_web_server(web_port, orchestrator) => {
            result.map_err(|e| anyhow::anyhow!("API server failed: {}", e))
        }
        _ = signal::ctrl_c() => {
            log::info!("Shutdown signal received, stopping service");
            Ok(())
        }
    }
}

/// Run a one-shot bundle assembly with console progress.
async fn run_bundle(mods: String, name: Option<String>, fetch: bool) -> Result<()> {
    let keys: Vec<String> = mods
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if keys.is_empty() {
        anyhow::bail!("no mods requested; pass --mods id1,id2,...");
    }

    let catalog = load_catalog(None)?;
    let packager = build_packager(catalog, fetch)?;

    let mut spec = BundleSpec::new(keys);
    spec.name = name;

    let (tx, mut rx) = mpsc::unbounded_channel::<PackProgress>();
    let printer = tokio::spawn(async move {
        while let Some(tick) = rx.recv().await {
            log::info!("[{:>3}%] {}", tick.percent, tick.message);
        }
    });

    let result = packager.run(&spec, tx, CancellationToken::new()).await;
    let _ = printer.await;

    match result {
        Ok(output) => {
            log::info!(
                "Bundle ready: {} ({} mods, {} bytes)",
                output.archive_path.display(),
                output.mod_count,
                output.size_bytes
            );
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("bundling failed: {}", e)),
    }
}

/// Load the catalog and report its contents.
fn run_validate_catalog(path_override: Option<String>) -> Result<()> {
    let catalog = load_catalog(path_override.as_deref())?;

    let mut sections: Vec<(&str, usize)> = catalog.section_counts().into_iter().collect();
    sections.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    for (section, count) in sections {
        log::info!("  {:<24} {} mod(s)", section, count);
    }

    let missing_urls = catalog.mods.iter().filter(|m| m.url.is_none()).count();
    if missing_urls > 0 {
        log::warn!("{} mod(s) have no source url (fetch strategy would fail for them)", missing_urls);
    }
    Ok(())
}
