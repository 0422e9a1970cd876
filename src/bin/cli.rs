//! Harvester CLI
//!
//! Local execution entry point for the collection engine.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use harvester::{
    error::Result,
    models::Config,
    pipeline::{self, Collector},
    services::ConditionalFetcher,
    storage::{ArchiveStore, DirArchive, JsonlSink, MetadataStore},
    utils::http,
};

/// Harvester - Incremental Source Collector
#[derive(Parser, Debug)]
#[command(
    name = "harvester",
    version,
    about = "Incremental feed and listing collector"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "harvester.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one collection cycle over all configured sources
    Run,

    /// Validate the configuration file
    Validate,

    /// List recorded sources and their stored change-detection state
    Sources,

    /// Remove sources from the metadata store and commit
    Purge {
        /// Source URIs to remove
        uris: Vec<String>,
    },
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

    let config = Config::load(&cli.config)?;
    log::info!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Run => {
            config.validate()?;

            let store = Arc::new(MetadataStore::open(&config.engine.store_path)?);
            let client = http::create_client(&config.engine)?;
            let algorithm = config.engine.checksum.parse()?;
            let fetcher = ConditionalFetcher::new(
                client,
                Arc::clone(&store),
                algorithm,
                config.engine.fetch_on_ambiguous,
            );

            let sink = Arc::new(JsonlSink::new(&config.engine.sink_path));
            let archive = config
                .engine
                .archive_dir
                .as_ref()
                .map(|dir| Arc::new(DirArchive::new(dir)) as Arc<dyn ArchiveStore>);

            let collector = Collector::new(fetcher, sink, archive);
            let stats = pipeline::run_cycle(&config, &collector).await?;

            log::info!(
                "Run complete: {} forwarded from {} sources ({} failed)",
                stats.forwarded,
                stats.sources,
                stats.failures
            );
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("Config OK: {} source(s) defined", config.sources.len());
        }

        Command::Sources => {
            let store = MetadataStore::open(&config.engine.store_path)?;
            for id in store.source_ids()? {
                let meta = store.get(&id)?;
                let fingerprint = if meta.fingerprint.len() > 12 {
                    &meta.fingerprint[..12]
                } else {
                    meta.fingerprint.as_str()
                };
                println!("{id}\t{fingerprint}\t{}", meta.last_modified.to_rfc3339());
            }
            log::info!("{} source(s) recorded", store.len());
        }

        Command::Purge { uris } => {
            if uris.is_empty() {
                log::warn!("No URIs given; nothing to purge");
                return Ok(());
            }
            let store = MetadataStore::open(&config.engine.store_path)?;
            store.remove_all(&uris);
            store.save()?;
            log::info!("Purged {} source(s)", uris.len());
        }
    }

    Ok(())
}
