//! Logging initialization and startup diagnostics
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - Catalog and mods directory validation at startup

use anyhow::Result;
use simplelog::*;
use std::fs::File;
use std::path::Path;

use crate::core::config;

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Failed to initialize logger
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Info, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs the distribution configuration at startup.
///
/// Validates and logs:
/// - CATALOG_PATH existence
/// - MODS_DIR existence (local strategy only)
/// - BUNDLE_DIR, creating it if missing
pub fn log_startup_configuration() {
    let catalog_path = config::expand_path(&config::CATALOG_PATH);
    if Path::new(&catalog_path).exists() {
        log::info!("✅ CATALOG_PATH: {}", catalog_path);
    } else {
        log::error!("❌ CATALOG_PATH: {} (FILE NOT FOUND!)", catalog_path);
        log::error!("   Bundle requests will fail until a catalog is provided");
    }

    let strategy = config::PACKAGER_STRATEGY.as_str();
    log::info!("Packaging strategy: {}", strategy);

    if strategy == "local" {
        let mods_dir = config::expand_path(&config::MODS_DIR);
        if Path::new(&mods_dir).is_dir() {
            log::info!("✅ MODS_DIR: {}", mods_dir);
        } else {
            log::warn!("⚠️  MODS_DIR: {} (directory missing)", mods_dir);
            log::warn!("   Local packaging will fail for every mod file");
        }
    }

    let bundle_dir = config::expand_path(&config::BUNDLE_DIR);
    if !Path::new(&bundle_dir).is_dir() {
        match std::fs::create_dir_all(&bundle_dir) {
            Ok(()) => log::info!("Created BUNDLE_DIR: {}", bundle_dir),
            Err(e) => log::error!("❌ BUNDLE_DIR: {} cannot be created: {}", bundle_dir, e),
        }
    } else {
        log::info!("✅ BUNDLE_DIR: {}", bundle_dir);
    }
}
