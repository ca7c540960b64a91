//! Main processing pipeline.
//!
//! Runs two long-lived tasks connected by one bounded queue:
//! - **Discovery**: lists unprocessed objects every poll interval and queues
//!   the ones that pass the filters
//! - **Download**: ingests queued objects one at a time, decoding on tokio's
//!   blocking pool and publishing each record as it is decoded
//!
//! A full queue blocks discovery, which is the only backpressure path. Both
//! tasks watch the same shutdown token at every point where they wait.

mod pending;
pub mod signal;
mod tasks;

pub use pending::PendingSet;

use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, info_span, warn};

use crate::config::{Config, IngestConfig};
use crate::emit;
use crate::error::{
    AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError, PipelineStorageSnafu,
    TaskJoinSnafu,
};
use crate::metrics::events::QueueDepth;
use crate::sink::{PublisherRef, StdoutPublisher};
use crate::storage::{StorageProviderRef, build_storage};

use tasks::{Discovery, Downloader, Finalize, IngestSettings};

/// How often the orchestrator logs queue status.
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Statistics about the pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub files_discovered: u64,
    pub files_ingested: u64,
    pub files_failed: u64,
    pub records_published: u64,
}

/// The discovery and download tasks plus everything they share.
pub struct Pipeline {
    ingest: IngestConfig,
    storage: StorageProviderRef,
    publisher: PublisherRef,
    shutdown: CancellationToken,
    span: Span,
}

impl Pipeline {
    pub fn new(
        ingest: IngestConfig,
        storage: StorageProviderRef,
        publisher: PublisherRef,
        shutdown: CancellationToken,
    ) -> Result<Self, PipelineError> {
        ingest.validate().context(ConfigSnafu)?;
        Ok(Self {
            ingest,
            storage,
            publisher,
            shutdown,
            span: Span::none(),
        })
    }

    /// Parent span for both tasks.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Run until `shutdown` is cancelled, then wait for both tasks.
    ///
    /// A file being downloaded when shutdown arrives is finished first.
    pub async fn run(self) -> Result<PipelineStats, PipelineError> {
        let Pipeline {
            ingest,
            storage,
            publisher,
            shutdown,
            span,
        } = self;

        let filter = ingest.file_filter().context(ConfigSnafu)?;
        let settings = IngestSettings {
            codec: ingest.codec,
            unpack: ingest.unpack_gzip,
            finalize: if ingest.delete {
                Finalize::Remove
            } else {
                Finalize::MarkProcessed
            },
        };

        // Cancelling the child stops both tasks without touching the caller's token.
        let shutdown = shutdown.child_token();
        let (tx, rx) = mpsc::channel(ingest.queue_capacity);
        let queue = tx.downgrade();
        let pending = PendingSet::new();

        let discovery = Discovery::spawn(
            storage.clone(),
            filter,
            pending.clone(),
            tx,
            ingest.poll_interval(),
            shutdown.clone(),
            info_span!(parent: &span, "discovery"),
        );
        let downloader = Downloader::spawn(
            storage.clone(),
            publisher,
            pending.clone(),
            rx,
            settings,
            shutdown.clone(),
            info_span!(parent: &span, "download"),
        );

        span.in_scope(|| {
            info!(
                source = %storage.describe(),
                codec = %settings.codec,
                poll_interval_secs = ingest.poll_interval_secs,
                queue_capacity = ingest.queue_capacity,
                "Pipeline started"
            )
        });

        let mut status = interval(STATUS_INTERVAL);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    span.in_scope(|| info!("Shutdown requested, stopping pipeline"));
                    break;
                }
                _ = status.tick() => {
                    // The weak handle only upgrades while discovery holds the sender.
                    let Some(tx) = queue.upgrade() else {
                        span.in_scope(|| warn!("Discovery stopped on its own, stopping pipeline"));
                        break;
                    };
                    let queued = tx.max_capacity() - tx.capacity();
                    drop(tx);
                    emit!(QueueDepth { count: queued });
                    span.in_scope(|| info!(queued, pending = pending.len(), "Status"));
                }
            }
        }

        shutdown.cancel();
        let files_discovered = discovery.join().await.context(TaskJoinSnafu)?;
        let downloads = downloader.join().await.context(TaskJoinSnafu)?;

        let stats = PipelineStats {
            files_discovered,
            files_ingested: downloads.files_ingested,
            files_failed: downloads.files_failed,
            records_published: downloads.records_published,
        };
        span.in_scope(|| debug!(?stats, "Pipeline stopped"));
        Ok(stats)
    }
}

/// Run the pipeline described by `config`, publishing to stdout, until a
/// termination signal arrives.
pub async fn run_pipeline(config: Config) -> Result<PipelineStats, PipelineError> {
    let shutdown = CancellationToken::new();
    signal::cancel_on_signal(shutdown.clone());

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        crate::metrics::init(addr, shutdown.clone()).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    let span = info_span!("sleet", bucket = %config.source.bucket);
    let storage = build_storage(&config.source, &span)
        .await
        .context(PipelineStorageSnafu)?;
    let publisher: PublisherRef = Arc::new(StdoutPublisher::stdout());

    Pipeline::new(config.ingest, storage, publisher, shutdown)?
        .with_span(span)
        .run()
        .await
}
