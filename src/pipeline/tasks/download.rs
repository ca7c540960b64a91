//! Background download task.
//!
//! Takes one path at a time off the queue, decodes it on the blocking pool
//! while publishing each record, then removes or marks the object.

use snafu::prelude::*;
use std::io::Read;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, warn};

use crate::codec::{Codec, CodecKind};
use crate::emit;
use crate::error::{
    DecodeSnafu, DecodeTaskSnafu, FinalizeSnafu, IngestError, OpenSnafu, PublishSnafu,
};
use crate::metrics::events::{
    FileIngestDuration, FileProcessed, FileStatus, PendingFiles, RecordsPublished,
};
use crate::pipeline::PendingSet;
use crate::sink::{Event, PublisherRef};
use crate::source::maybe_decompress;
use crate::storage::StorageProviderRef;

/// What to do with an object once all of its records are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(in crate::pipeline) enum Finalize {
    Remove,
    MarkProcessed,
}

/// Per-file settings shared by every ingest.
#[derive(Debug, Clone, Copy)]
pub(in crate::pipeline) struct IngestSettings {
    pub codec: CodecKind,
    pub unpack: bool,
    pub finalize: Finalize,
}

/// Counters kept by the download loop.
#[derive(Debug, Clone, Copy, Default)]
pub(in crate::pipeline) struct DownloadStats {
    pub files_ingested: u64,
    pub files_failed: u64,
    pub records_published: u64,
}

/// Handle to the background download task.
pub(in crate::pipeline) struct Downloader {
    handle: JoinHandle<DownloadStats>,
}

impl Downloader {
    /// Spawn the download task. It stops when `shutdown` is cancelled or the
    /// queue is closed; a file already in flight is finished first.
    pub fn spawn(
        storage: StorageProviderRef,
        publisher: PublisherRef,
        pending: PendingSet,
        rx: mpsc::Receiver<String>,
        settings: IngestSettings,
        shutdown: CancellationToken,
        span: Span,
    ) -> Self {
        let task = DownloadLoop {
            storage,
            publisher,
            pending,
            settings,
        };
        let handle = tokio::spawn(task.run(rx, shutdown).instrument(span));
        Self { handle }
    }

    pub async fn join(self) -> Result<DownloadStats, tokio::task::JoinError> {
        self.handle.await
    }
}

struct DownloadLoop {
    storage: StorageProviderRef,
    publisher: PublisherRef,
    pending: PendingSet,
    settings: IngestSettings,
}

impl DownloadLoop {
    async fn run(self, mut rx: mpsc::Receiver<String>, shutdown: CancellationToken) -> DownloadStats {
        let mut stats = DownloadStats::default();

        loop {
            let path = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(path) => path,
                    None => break,
                },
            };

            let start = Instant::now();
            let (published, result) = self.ingest(&path).await;
            self.pending.remove(&path);
            emit!(PendingFiles {
                count: self.pending.len()
            });

            stats.records_published += published;
            match result {
                Ok(()) => {
                    stats.files_ingested += 1;
                    info!(path, records = published, "Ingested file");
                    emit!(FileProcessed {
                        status: FileStatus::Success
                    });
                    emit!(FileIngestDuration {
                        duration: start.elapsed()
                    });
                }
                Err(e) if e.is_not_found() => {
                    stats.files_failed += 1;
                    warn!(path, error = %e, "File vanished before it could be ingested");
                    emit!(FileProcessed {
                        status: FileStatus::Skipped
                    });
                }
                Err(e) => {
                    stats.files_failed += 1;
                    warn!(path, records = published, error = %e, "Abandoning file, it will be retried");
                    emit!(FileProcessed {
                        status: FileStatus::Failed
                    });
                }
            }
        }

        debug!(
            ingested = stats.files_ingested,
            failed = stats.files_failed,
            "Download stopped"
        );
        stats
    }

    /// Read, decode, publish and finalize one object. Returns the number of
    /// records published, which may be non-zero even on failure.
    async fn ingest(&self, path: &str) -> (u64, Result<(), IngestError>) {
        let reader = match self.storage.read(path).await.context(OpenSnafu { path }) {
            Ok(reader) => reader,
            Err(e) => return (0, Err(e)),
        };

        let input = SyncIoBridge::new(reader);
        let publisher = self.publisher.clone();
        let settings = self.settings;
        let owned_path = path.to_string();

        let decoded = tokio::task::spawn_blocking(move || {
            decode_and_publish(&owned_path, input, settings, &publisher)
        })
        .await
        .context(DecodeTaskSnafu { path });

        let published = match decoded {
            Ok((published, Ok(()))) => published,
            Ok((published, Err(e))) => return (published, Err(e)),
            Err(e) => return (0, Err(e)),
        };
        emit!(RecordsPublished { count: published });

        let finalized = match settings.finalize {
            Finalize::Remove => self.storage.remove(path).await,
            Finalize::MarkProcessed => self.storage.mark_processed(path).await,
        };
        (published, finalized.context(FinalizeSnafu { path }))
    }
}

/// Drive the codec over `input`, publishing every record as soon as it is
/// decoded. Runs on the blocking pool.
fn decode_and_publish<R>(
    path: &str,
    input: R,
    settings: IngestSettings,
    publisher: &PublisherRef,
) -> (u64, Result<(), IngestError>)
where
    R: Read + Send,
{
    let input = match maybe_decompress(path, input, settings.unpack) {
        Ok(input) => input,
        Err(source) => {
            return (
                0,
                Err(IngestError::Decompress {
                    path: path.to_string(),
                    source,
                }),
            );
        }
    };

    let mut codec = Codec::new(settings.codec, path, input);
    let mut published = 0;

    while codec.advance() {
        let Some(record) = codec.take_current() else {
            continue;
        };
        if let Err(e) = publisher
            .publish(Event::from_record(record))
            .context(PublishSnafu { path })
        {
            return (published, Err(e));
        }
        published += 1;
    }

    match codec.into_failure() {
        Some(source) => (
            published,
            Err(IngestError::Decode {
                path: path.to_string(),
                source,
            }),
        ),
        None => (published, Ok(())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelPublisher;
    use crate::storage::ObjectStoreBackend;
    use crate::storage::StorageProvider;
    use object_store::PutPayload;
    use object_store::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    async fn backend(files: &[(&str, &'static [u8])]) -> Arc<ObjectStoreBackend> {
        let backend = Arc::new(ObjectStoreBackend::memory());
        for (path, content) in files {
            backend
                .store()
                .put(&Path::from(*path), PutPayload::from_static(content))
                .await
                .unwrap();
        }
        backend
    }

    fn settings(codec: CodecKind, finalize: Finalize) -> IngestSettings {
        IngestSettings {
            codec,
            unpack: true,
            finalize,
        }
    }

    struct Harness {
        tx: mpsc::Sender<String>,
        events: mpsc::Receiver<Event>,
        pending: PendingSet,
        shutdown: CancellationToken,
        downloader: Downloader,
    }

    fn start(storage: Arc<ObjectStoreBackend>, settings: IngestSettings) -> Harness {
        let (publisher, events) = ChannelPublisher::channel(64);
        let (tx, rx) = mpsc::channel(4);
        let pending = PendingSet::new();
        let shutdown = CancellationToken::new();
        let downloader = Downloader::spawn(
            storage,
            Arc::new(publisher),
            pending.clone(),
            rx,
            settings,
            shutdown.clone(),
            Span::none(),
        );
        Harness {
            tx,
            events,
            pending,
            shutdown,
            downloader,
        }
    }

    impl Harness {
        async fn queue(&self, path: &str) {
            self.pending.insert(path);
            self.tx.send(path.to_string()).await.unwrap();
        }

        async fn finish(self) -> (DownloadStats, Vec<Event>) {
            let Harness {
                tx,
                mut events,
                downloader,
                ..
            } = self;
            drop(tx);
            let stats = tokio::time::timeout(Duration::from_secs(5), downloader.join())
                .await
                .expect("download loop should stop when the queue closes")
                .unwrap();
            let mut published = Vec::new();
            while let Ok(event) = events.try_recv() {
                published.push(event);
            }
            (stats, published)
        }
    }

    #[tokio::test]
    async fn test_lines_are_published_then_marked() {
        let storage = backend(&[("a.log", b"first\nsecond\n")]).await;
        let harness = start(storage.clone(), settings(CodecKind::Text, Finalize::MarkProcessed));
        harness.queue("a.log").await;
        let pending = harness.pending.clone();

        let (stats, events) = harness.finish().await;
        assert_eq!(stats.files_ingested, 1);
        assert_eq!(stats.records_published, 2);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].fields["event"], "first");
        assert_eq!(events[0].fields["line"], 1);
        assert_eq!(events[1].fields["event"], "second");
        assert_eq!(events[1].fields["file"], "a.log");

        assert!(storage.was_processed("a.log").await.unwrap());
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_delete_policy_removes_object() {
        let storage = backend(&[("a.json", br#"{"a":1}{"b":2}"#)]).await;
        let harness = start(storage.clone(), settings(CodecKind::JsonStream, Finalize::Remove));
        harness.queue("a.json").await;

        let (stats, events) = harness.finish().await;
        assert_eq!(stats.files_ingested, 1);
        assert_eq!(events[1].fields["json"]["b"], 2);
        assert!(storage.list_unprocessed().await.unwrap().is_empty());
        assert!(storage.read("a.json").await.is_err());
    }

    #[tokio::test]
    async fn test_decode_failure_keeps_published_records_and_skips_finalize() {
        let storage = backend(&[("bad.json", br#"[{"a":1},{"b":"#)]).await;
        let harness = start(storage.clone(), settings(CodecKind::JsonArray, Finalize::MarkProcessed));
        harness.queue("bad.json").await;
        let pending = harness.pending.clone();

        let (stats, events) = harness.finish().await;
        assert_eq!(stats.files_failed, 1);
        assert_eq!(stats.files_ingested, 0);
        assert_eq!(stats.records_published, 1);
        assert_eq!(events.len(), 1);

        assert!(!storage.was_processed("bad.json").await.unwrap());
        assert_eq!(storage.list_unprocessed().await.unwrap(), vec!["bad.json"]);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_missing_object_is_skipped() {
        let storage = backend(&[("b.log", b"only\n")]).await;
        let harness = start(storage.clone(), settings(CodecKind::Text, Finalize::MarkProcessed));
        harness.queue("gone.log").await;
        harness.queue("b.log").await;
        let pending = harness.pending.clone();

        let (stats, events) = harness.finish().await;
        assert_eq!(stats.files_failed, 1);
        assert_eq!(stats.files_ingested, 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fields["file"], "b.log");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_gzip_objects_are_unpacked() {
        use flate2::Compression as Level;
        use flate2::write::GzEncoder;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Level::default());
        encoder.write_all(b"zipped\n").unwrap();
        let compressed = encoder.finish().unwrap();

        let storage = Arc::new(ObjectStoreBackend::memory());
        storage
            .store()
            .put(&Path::from("a.log.gz"), PutPayload::from(compressed))
            .await
            .unwrap();

        let harness = start(storage, settings(CodecKind::Text, Finalize::MarkProcessed));
        harness.queue("a.log.gz").await;

        let (_, events) = harness.finish().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fields["event"], "zipped");
    }

    #[tokio::test]
    async fn test_closed_sink_fails_the_file() {
        let storage = backend(&[("a.log", b"x\ny\n")]).await;
        let harness = start(storage.clone(), settings(CodecKind::Text, Finalize::MarkProcessed));
        let Harness {
            tx,
            events,
            pending,
            shutdown,
            downloader,
        } = harness;
        drop(events);

        pending.insert("a.log");
        tx.send("a.log".to_string()).await.unwrap();
        drop(tx);

        let stats = downloader.join().await.unwrap();
        assert_eq!(stats.files_failed, 1);
        assert_eq!(stats.records_published, 0);
        assert!(!storage.was_processed("a.log").await.unwrap());
        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_loop() {
        let storage = backend(&[]).await;
        let harness = start(storage, settings(CodecKind::Text, Finalize::MarkProcessed));
        harness.shutdown.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(5), harness.downloader.join())
            .await
            .expect("idle download loop should stop on shutdown")
            .unwrap();
        assert_eq!(stats.files_ingested, 0);
    }
}
