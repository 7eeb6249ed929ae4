//! feedwatch CLI
//!
//! Local execution entry point. For AWS Lambda, use `feedwatch-lambda`.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use feedwatch::{
    config,
    error::{AppError, Result},
    pipeline,
    storage::{HistoryStore, LocalStorage, MemoryStore},
    utils::HttpProber,
};

/// feedwatch - job feed refresh monitor
#[derive(Parser, Debug)]
#[command(
    name = "feedwatch",
    version,
    about = "Tracks when job-listing feeds are refreshed"
)]
struct Cli {
    /// Path to storage directory holding config, catalog and history
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Config file (default: {storage_dir}/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one monitoring cycle over the catalog
    Run {
        /// Catalog file (default: catalog.path from the config)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Keep history in memory only (dry run)
        #[arg(long)]
        memory: bool,
    },

    /// Validate configuration and catalog
    Validate {
        /// Catalog file (default: catalog.path from the config)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Print a feed's history record as JSON
    Show {
        /// Feed id
        feed_id: String,
    },

    /// Summarize stored history and leases
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.storage_dir.join(config::CONFIG_FILE));

    match cli.command {
        Command::Run { catalog, memory } => {
            let (config, catalog) =
                config::load_all(&cli.storage_dir, Some(&config_path), catalog.as_deref())?;
            log::info!(
                "Loaded {} feeds from {}",
                catalog.len(),
                cli.storage_dir.display()
            );

            let prober = Arc::new(HttpProber::from_config(&config.monitor)?);

            let summary = if memory {
                log::info!("Dry run: history kept in memory");
                pipeline::run_dispatch(&config, &catalog, Arc::new(MemoryStore::new()), prober)
                    .await?
            } else {
                let storage = Arc::new(LocalStorage::new(&cli.storage_dir));
                pipeline::run_dispatch(&config, &catalog, storage, prober).await?
            };

            if summary.failed > 0 {
                log::warn!("{} feeds failed this cycle", summary.failed);
            }
        }

        Command::Validate { catalog } => {
            pipeline::run_validate(&cli.storage_dir, Some(&config_path), catalog.as_deref())?;
            log::info!("All validations passed!");
        }

        Command::Show { feed_id } => {
            let storage = LocalStorage::new(&cli.storage_dir);
            let record = storage
                .find_record(&feed_id)
                .await?
                .ok_or_else(|| AppError::feed(&feed_id, "no history recorded"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Command::Info => {
            let config = config::load_config(&config_path)?;
            log::info!("Storage directory: {}", cli.storage_dir.display());

            let storage = Arc::new(LocalStorage::new(&cli.storage_dir));
            pipeline::run_info(&config, storage, Utc::now()).await?;
        }
    }

    Ok(())
}
