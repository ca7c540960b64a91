//! sleet: ingests files from a bucket as a stream of JSON events on stdout.
//!
//! Objects are read from GCS, a local directory or memory, decoded with the
//! configured codec and then deleted or marked processed.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sleet::config::Config;
use sleet::error::{ConfigSnafu, PipelineError, PipelineStorageSnafu};
use sleet::pipeline::run_pipeline;
use sleet::storage::BackendConfig;

/// Bucket to event stream ingestion tool.
#[derive(Parser, Debug)]
#[command(name = "sleet")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    // Events go to stdout, so logs go to stderr.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("sleet starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    if args.dry_run {
        dry_run(&config)?;
        return Ok(());
    }

    let stats = run_pipeline(config).await?;

    info!("Pipeline stopped");
    info!("  Files discovered: {}", stats.files_discovered);
    info!("  Files ingested: {}", stats.files_ingested);
    info!("  Files failed: {}", stats.files_failed);
    info!("  Records published: {}", stats.records_published);

    Ok(())
}

/// Log the effective settings without connecting to anything.
fn dry_run(config: &Config) -> Result<(), PipelineError> {
    info!("Dry run mode - validating configuration");

    let backend =
        BackendConfig::parse_url(&config.source.bucket).context(PipelineStorageSnafu)?;
    info!("Source: {:?}", backend);
    info!("Metadata key: {}", config.source.metadata_key);
    if let Some(db) = &config.source.processed_db_path {
        info!("Processed db: {}", db);
    }

    let ingest = &config.ingest;
    info!("Poll interval: {}s", ingest.poll_interval_secs);
    info!("Include: {:?}", ingest.file_matches);
    if !ingest.file_exclude.is_empty() {
        info!("Exclude: {:?}", ingest.file_exclude);
    }
    info!("Codec: {}", ingest.codec);
    info!(
        "After ingest: {}",
        if ingest.delete { "delete" } else { "mark processed" }
    );
    info!("Unpack compressed objects: {}", ingest.unpack_gzip);
    info!("Queue capacity: {}", ingest.queue_capacity);

    if config.metrics.enabled {
        info!("Metrics: http://{}/metrics", config.metrics.address);
    }

    info!("Configuration is valid");
    Ok(())
}
