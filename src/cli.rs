use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "moddepot")]
#[command(author, version, about = "Mod bundle distribution service with live download progress", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bundle service (API server + metrics server)
    Serve {
        /// API port, overrides WEB_PORT
        #[arg(long)]
        port: Option<u16>,
    },

    /// Assemble one bundle directly, without the service
    Bundle {
        /// Comma-separated catalog keys (mod ids or names)
        #[arg(short, long)]
        mods: String,

        /// Label used for the archive file name
        #[arg(short, long)]
        name: Option<String>,

        /// Fetch files over HTTP instead of staging from MODS_DIR
        #[arg(long)]
        fetch: bool,
    },

    /// Load the catalog and report what it contains
    ValidateCatalog {
        /// Catalog path, overrides CATALOG_PATH
        #[arg(short, long)]
        catalog: Option<String>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
