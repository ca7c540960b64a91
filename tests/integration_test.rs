//! Integration tests for sleet

use std::sync::Arc;
use std::time::Duration;

use object_store::PutPayload;
use object_store::path::Path;
use sleet::config::{Config, IngestConfig};
use sleet::sink::{ChannelPublisher, Event, PublisherRef};
use sleet::storage::{ObjectStoreBackend, StorageProvider, StorageProviderRef};
use sleet::{Pipeline, PipelineStats};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

async fn memory_store(files: &[(&str, &'static [u8])]) -> Arc<ObjectStoreBackend> {
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

/// Run a pipeline until `expected` events arrive and `settled` holds, then
/// shut it down.
async fn run_until<F, Fut>(
    ingest: IngestConfig,
    storage: StorageProviderRef,
    expected: usize,
    settled: F,
) -> (PipelineStats, Vec<Event>)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let (publisher, mut rx): (ChannelPublisher, mpsc::Receiver<Event>) =
        ChannelPublisher::channel(64);
    let publisher: PublisherRef = Arc::new(publisher);
    let shutdown = CancellationToken::new();

    let pipeline = Pipeline::new(ingest, storage, publisher, shutdown.clone()).unwrap();
    let handle = tokio::spawn(pipeline.run());

    let mut events = Vec::new();
    while events.len() < expected {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("pipeline should publish in time")
            .expect("publisher should stay open");
        events.push(event);
    }

    for _ in 0..500 {
        if settled().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown.cancel();
    let stats = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("pipeline should stop on shutdown")
        .unwrap()
        .unwrap();
    (stats, events)
}

mod config_tests {
    use super::*;
    use sleet::codec::CodecKind;

    #[test]
    fn test_full_config_yaml() {
        let yaml = r#"
source:
  bucket: gs://logs-bucket/incoming
  credentials_file: /etc/sleet/sa.json
  metadata_key: x-goog-meta-ingested
  processed_db_path: /var/lib/sleet/processed.db

ingest:
  poll_interval_secs: 30
  file_matches: "*.json"
  file_exclude: "*.tmp.json"
  codec: json-array
  delete: true
  unpack_gzip: true
  queue_capacity: 8

metrics:
  enabled: true
  address: "127.0.0.1:9999"
"#;
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.source.bucket, "gs://logs-bucket/incoming");
        assert_eq!(config.source.metadata_key, "x-goog-meta-ingested");
        assert_eq!(config.ingest.codec, CodecKind::JsonArray);
        assert_eq!(config.ingest.poll_interval(), Duration::from_secs(30));
        assert!(config.ingest.delete);
        assert!(config.metrics.enabled);

        let filter = config.ingest.file_filter().unwrap();
        assert!(filter.is_included("day/1.json"));
        assert!(filter.is_excluded("upload.tmp.json"));
    }

    #[test]
    fn test_unknown_codec_is_rejected_with_valid_list() {
        let yaml = r#"
source:
  bucket: memory://
ingest:
  codec: xml
"#;
        let err = Config::from_yaml(yaml).unwrap_err().to_string();
        assert!(err.contains("xml"));
        assert!(err.contains("json-array, json-stream, text, clob, blob"));
    }

    #[test]
    fn test_blank_metadata_key_is_rejected() {
        let yaml = r#"
source:
  bucket: memory://
  metadata_key: "   "
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }
}

mod storage_tests {
    use super::*;
    use sleet::storage::{BackendConfig, build_storage};
    use tracing::Span;

    #[test]
    fn test_backend_selection() {
        assert_eq!(
            BackendConfig::parse_url("memory://").unwrap(),
            BackendConfig::Memory
        );
        assert_eq!(
            BackendConfig::parse_url("file:///data/in").unwrap(),
            BackendConfig::Local {
                path: "/data/in".to_string()
            }
        );
        assert!(matches!(
            BackendConfig::parse_url("my-bucket").unwrap(),
            BackendConfig::Gcs { .. }
        ));
    }

    #[tokio::test]
    async fn test_marks_exclude_and_remove_clears() {
        let storage = memory_store(&[("a.log", b"x"), ("b.log", b"y")]).await;

        storage.mark_processed("a.log").await.unwrap();
        storage.mark_processed("a.log").await.unwrap();
        assert!(storage.was_processed("a.log").await.unwrap());
        assert_eq!(storage.list_unprocessed().await.unwrap(), vec!["b.log"]);

        storage.remove("a.log").await.unwrap();
        assert!(!storage.was_processed("a.log").await.unwrap());
        assert!(storage.remove("a.log").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_local_store_with_processed_db() {
        let data = tempfile::TempDir::new().unwrap();
        let state = tempfile::TempDir::new().unwrap();
        std::fs::write(data.path().join("a.log"), "line\n").unwrap();
        std::fs::create_dir(data.path().join("nested")).unwrap();
        std::fs::write(data.path().join("nested/b.log"), "line\n").unwrap();

        let mut config = Config::for_bucket(data.path().to_str().unwrap());
        config.source.processed_db_path = Some(
            state
                .path()
                .join("processed.db")
                .to_str()
                .unwrap()
                .to_string(),
        );

        let storage = build_storage(&config.source, &Span::none()).await.unwrap();
        assert_eq!(
            storage.list_unprocessed().await.unwrap(),
            vec!["a.log", "nested/b.log"]
        );
        storage.mark_processed("a.log").await.unwrap();

        // A fresh process still sees the mark.
        let storage = build_storage(&config.source, &Span::none()).await.unwrap();
        assert_eq!(
            storage.list_unprocessed().await.unwrap(),
            vec!["nested/b.log"]
        );
    }
}

mod codec_tests {
    use sleet::codec::{Codec, CodecKind, Payload};

    fn drain(kind: CodecKind, input: &[u8]) -> (Vec<(u64, Payload)>, bool) {
        let mut codec = Codec::new(kind, "file", input);
        let mut out = Vec::new();
        while codec.advance() {
            let record = codec.current().unwrap();
            out.push((record.ordinal, record.payload.clone()));
        }
        let failed = codec.failure().is_some();
        (out, failed)
    }

    #[test]
    fn test_json_array_counts_and_ordinals() {
        let input = br#"[{"n":1}, {"n":2}, {"n":3}, {"n":4}]"#;
        let (records, failed) = drain(CodecKind::JsonArray, input);
        assert!(!failed);
        let ordinals: Vec<u64> = records.iter().map(|(n, _)| *n).collect();
        assert_eq!(ordinals, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_json_array_requires_bracket() {
        let (records, failed) = drain(CodecKind::JsonArray, br#"{"a":1}"#);
        assert!(records.is_empty());
        assert!(failed);
    }

    #[test]
    fn test_json_stream_stops_at_garbage() {
        let (records, failed) = drain(CodecKind::JsonStream, br#"{"a":1}garbage"#);
        assert_eq!(records.len(), 1);
        assert!(failed);

        let (records, failed) = drain(CodecKind::JsonStream, b"");
        assert!(records.is_empty());
        assert!(!failed);
    }

    #[test]
    fn test_lines_and_whole_file() {
        let (records, _) = drain(CodecKind::Text, b"x\ny");
        assert_eq!(
            records,
            vec![
                (1, Payload::Text("x".to_string())),
                (2, Payload::Text("y".to_string())),
            ]
        );

        let mut codec = Codec::new(CodecKind::Blob, "file", &b"\x00\x01"[..]);
        assert!(codec.advance());
        assert_eq!(
            codec.current().unwrap().payload,
            Payload::Base64("AAE=".to_string())
        );
        assert!(!codec.advance());
    }
}

mod pipeline_tests {
    use super::*;
    use async_trait::async_trait;
    use sleet::codec::CodecKind;
    use sleet::error::StorageError;
    use sleet::storage::{Middleware, ObjectReader, compose};
    use std::sync::Mutex;
    use tracing::Span;

    /// Records every path that is opened for reading.
    #[derive(Debug)]
    struct RecordingReads {
        inner: Arc<ObjectStoreBackend>,
        reads: Mutex<Vec<String>>,
    }

    impl RecordingReads {
        fn new(inner: Arc<ObjectStoreBackend>) -> Self {
            Self {
                inner,
                reads: Mutex::new(Vec::new()),
            }
        }

        fn reads(&self) -> Vec<String> {
            self.reads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StorageProvider for RecordingReads {
        async fn list_unprocessed(&self) -> Result<Vec<String>, StorageError> {
            self.inner.list_unprocessed().await
        }

        async fn read(&self, path: &str) -> Result<ObjectReader, StorageError> {
            self.reads.lock().unwrap().push(path.to_string());
            self.inner.read(path).await
        }

        async fn remove(&self, path: &str) -> Result<(), StorageError> {
            self.inner.remove(path).await
        }

        async fn was_processed(&self, path: &str) -> Result<bool, StorageError> {
            self.inner.was_processed(path).await
        }

        async fn mark_processed(&self, path: &str) -> Result<(), StorageError> {
            self.inner.mark_processed(path).await
        }

        fn describe(&self) -> String {
            self.inner.describe()
        }
    }

    fn ingest(delete: bool) -> IngestConfig {
        IngestConfig {
            file_matches: "*.log".to_string(),
            codec: CodecKind::Text,
            delete,
            ..IngestConfig::default()
        }
    }

    #[tokio::test]
    async fn test_only_unprocessed_files_are_ingested_and_marked() {
        let backend = memory_store(&[("a.log", b"alpha\nbeta\n"), ("b.log", b"old\n")]).await;
        backend.mark_processed("b.log").await.unwrap();
        let recording = Arc::new(RecordingReads::new(backend.clone()));
        let storage = compose(recording.clone(), &[Middleware::Logging], &Span::none())
            .await
            .unwrap();

        let store = backend.clone();
        let (stats, events) = run_until(ingest(false), storage, 2, || {
            let store = store.clone();
            async move { store.was_processed("a.log").await.unwrap() }
        })
        .await;

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.fields["file"] == "a.log"));
        assert_eq!(events[0].fields["event"], "alpha");
        assert_eq!(events[1].fields["line"], 2);

        assert_eq!(stats.files_discovered, 1);
        assert_eq!(stats.files_ingested, 1);
        assert_eq!(stats.records_published, 2);
        assert!(backend.list_unprocessed().await.unwrap().is_empty());
        assert_eq!(recording.reads(), vec!["a.log"]);
    }

    #[tokio::test]
    async fn test_delete_policy_removes_ingested_files() {
        let backend = memory_store(&[("a.log", b"alpha\n"), ("notes.txt", b"skip\n")]).await;

        let store = backend.clone();
        let (stats, events) = run_until(ingest(true), backend.clone(), 1, || {
            let store = store.clone();
            async move { store.list_unprocessed().await.unwrap() == vec!["notes.txt"] }
        })
        .await;

        assert_eq!(events.len(), 1);
        assert_eq!(stats.files_ingested, 1);
        assert_eq!(
            backend.list_unprocessed().await.unwrap(),
            vec!["notes.txt"]
        );
        assert!(!backend.was_processed("a.log").await.unwrap());
    }

    #[tokio::test]
    async fn test_broken_file_does_not_stop_the_pipeline() {
        let backend = memory_store(&[("a.log", b"fine\n")]).await;
        backend
            .store()
            .put(
                &Path::from("0-broken.log.gz"),
                PutPayload::from_static(b"definitely not gzip"),
            )
            .await
            .unwrap();

        let mut settings = ingest(false);
        settings.file_matches = "*".to_string();
        settings.unpack_gzip = true;

        // Listing is sorted, so the broken file is attempted first.
        let store = backend.clone();
        let (stats, events) = run_until(settings, backend.clone(), 1, || {
            let store = store.clone();
            async move { store.was_processed("a.log").await.unwrap() }
        })
        .await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fields["event"], "fine");
        assert_eq!(stats.files_ingested, 1);
        assert_eq!(stats.files_failed, 1);
        assert_eq!(
            backend.list_unprocessed().await.unwrap(),
            vec!["0-broken.log.gz"]
        );
    }
}
