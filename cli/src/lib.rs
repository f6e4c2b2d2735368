use std::path::PathBuf;

use clap::{Parser, Subcommand};
use utils::app_config::AppConfig;
use utils::error::Result;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "rust-modelsync", version)]
#[command(about = "Maintain a local machine-learning model repository", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (TOML or JSON) merged over the defaults
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Set the logging level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Make DESTINATION an exact replica of SOURCE
    MirrorCopy {
        /// Source directory (default: mirror.from_path)
        source: Option<String>,

        /// Destination directory, created if absent (default: mirror.to_path)
        destination: Option<String>,

        /// Print the plan without touching the destination
        #[arg(long)]
        dry_run: bool,

        /// Number of concurrent file operations
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,

        /// Keep directories left empty by deletions
        #[arg(long)]
        no_prune: bool,
    },

    /// Download a model file into the model repository
    Download {
        url: String,

        /// Model folder (default: second-to-last URL path segment)
        folder: Option<String>,

        /// Target file name (default: last URL path segment)
        #[arg(long)]
        filename: Option<String>,
    },

    /// List (and optionally delete) model files not used for a number of days
    RemoveUnused {
        /// Folder to check (default: models.root)
        folder: Option<String>,

        /// Age threshold in days (default: cleanup.days)
        #[arg(long, value_name = "N")]
        days: Option<u64>,

        /// Delete the listed files
        #[arg(long)]
        delete: bool,
    },
}

pub async fn cli_match() -> Result<()> {
    let cli = Cli::parse();

    // Merge the user configuration and flag overrides before logging starts
    AppConfig::merge_config(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        AppConfig::set("log.level", level)?;
    }

    let _guard = utils::logger::setup_logging()?;

    // Execute the subcommand
    match cli.command {
        Commands::MirrorCopy {
            source,
            destination,
            dry_run,
            concurrency,
            no_prune,
        } => commands::mirror_cmd(source, destination, dry_run, concurrency, no_prune).await?,
        Commands::Download { url, folder, filename } => commands::download_cmd(url, folder, filename).await?,
        Commands::RemoveUnused { folder, days, delete } => commands::remove_unused_cmd(folder, days, delete).await?,
    }

    Ok(())
}
