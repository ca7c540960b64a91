//! Storage abstraction over the bucket being watched.
//!
//! A [`StorageProvider`] lists unprocessed objects, streams their contents,
//! and records that they were ingested. Backends implement the trait
//! directly; middleware wraps another provider and forwards every call.
//! [`build_storage`] composes the base backend with the configured
//! middleware list.

mod explain;
mod gcs;
mod logging;
mod object;
mod processed;

pub use explain::{explain_found_files, filter_and_explain};
pub use gcs::{GcsBackend, GcsOptions};
pub use logging::LoggingStorage;
pub use object::ObjectStoreBackend;
pub use processed::ProcessedCache;

use async_trait::async_trait;
use regex::{Captures, Regex};
use snafu::prelude::*;
use std::fmt::Debug;
use std::sync::{Arc, LazyLock};
use tokio::io::AsyncRead;
use tracing::Span;

use crate::config::SourceConfig;
use crate::error::{InvalidUrlSnafu, StorageError};

/// Sequential reader over an object's bytes. Dropping it releases the
/// underlying connection or file handle.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<dyn StorageProvider>;

/// Uniform operations over a backing store.
///
/// Paths are opaque object names, as returned by `list_unprocessed`.
#[async_trait]
pub trait StorageProvider: Send + Sync + Debug {
    /// Every object not marked processed. Fails as a whole; there are no
    /// partial results.
    async fn list_unprocessed(&self) -> Result<Vec<String>, StorageError>;

    /// Open an object for reading. Missing objects are `NotFound`.
    async fn read(&self, path: &str) -> Result<ObjectReader, StorageError>;

    /// Delete an object and forget any processed mark for it. Missing
    /// objects are `NotFound`.
    async fn remove(&self, path: &str) -> Result<(), StorageError>;

    async fn was_processed(&self, path: &str) -> Result<bool, StorageError>;

    /// Record that an object was fully ingested. Idempotent.
    async fn mark_processed(&self, path: &str) -> Result<(), StorageError>;

    /// Short human readable description used in logs.
    fn describe(&self) -> String;
}

// URL patterns for the supported backends
const GCS_VIRTUAL: &str =
    r"^https://(?P<bucket>[a-z0-9\-_\.]+)\.storage\.googleapis\.com(/(?P<key>.+))?$";
const GCS_PATH: &str =
    r"^https://storage\.googleapis\.com/(?P<bucket>[a-z0-9\-_\.]+)(/(?P<key>.+))?$";
const GCS_URL: &str = r"^[gG][sS]://(?P<bucket>[a-z0-9\-\._]+)(/(?P<key>.+))?$";
const GCS_BARE: &str = r"^(?P<bucket>[a-z0-9][a-z0-9\-_\.]*[a-z0-9])$";

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_PATH: &str = r"^(?P<path>/.*)$";

const MEMORY_URL: &str = r"^memory://$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Memory,
    Local,
    Gcs,
}

/// Matchers in priority order; bare bucket names are tried last.
static MATCHERS: LazyLock<Vec<(Backend, Regex)>> = LazyLock::new(|| {
    [
        (Backend::Memory, MEMORY_URL),
        (Backend::Local, FILE_URI),
        (Backend::Local, FILE_PATH),
        (Backend::Gcs, GCS_PATH),
        (Backend::Gcs, GCS_VIRTUAL),
        (Backend::Gcs, GCS_URL),
        (Backend::Gcs, GCS_BARE),
    ]
    .into_iter()
    .map(|(backend, pattern)| {
        (
            backend,
            Regex::new(pattern).expect("static storage URL pattern compiles"),
        )
    })
    .collect()
});

/// Where the backing store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// A GCS bucket, optionally narrowed to a prefix.
    Gcs { bucket: String, prefix: Option<String> },
    /// A directory on the local filesystem.
    Local { path: String },
    /// A process-local in-memory store.
    Memory,
}

impl BackendConfig {
    /// Parse a bucket identifier.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        let matched = MATCHERS
            .iter()
            .find_map(|(backend, regex)| regex.captures(url).map(|caps| (*backend, caps)));

        match matched {
            Some((Backend::Memory, _)) => Ok(BackendConfig::Memory),
            Some((Backend::Local, caps)) => Self::parse_local(url, &caps),
            Some((Backend::Gcs, caps)) => Ok(Self::parse_gcs(&caps)),
            None => InvalidUrlSnafu { url }.fail(),
        }
    }

    fn parse_gcs(caps: &Captures) -> Self {
        let bucket = caps
            .name("bucket")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let prefix = caps
            .name("key")
            .map(|m| m.as_str().trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty());
        BackendConfig::Gcs { bucket, prefix }
    }

    /// The path is kept as written, so `file://data/in` stays relative.
    fn parse_local(url: &str, caps: &Captures) -> Result<Self, StorageError> {
        let path = caps.name("path").map_or("", |m| m.as_str());
        ensure!(!path.is_empty(), InvalidUrlSnafu { url });
        Ok(BackendConfig::Local {
            path: path.to_string(),
        })
    }
}

/// Wrappers applied around the base provider, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Middleware {
    /// Track processed objects in a local SQLite file.
    ProcessedCache { db_path: String, namespace: String },
    /// Log and meter every call.
    Logging,
}

impl Middleware {
    /// Middleware list for a source configuration.
    pub fn for_source(source: &SourceConfig) -> Vec<Middleware> {
        let mut chain = Vec::new();
        if let Some(db_path) = &source.processed_db_path {
            chain.push(Middleware::ProcessedCache {
                db_path: db_path.clone(),
                namespace: source.metadata_key.clone(),
            });
        }
        chain.push(Middleware::Logging);
        chain
    }

    async fn wrap(
        &self,
        inner: StorageProviderRef,
        span: &Span,
    ) -> Result<StorageProviderRef, StorageError> {
        Ok(match self {
            Middleware::ProcessedCache { db_path, namespace } => {
                Arc::new(ProcessedCache::open(inner, db_path, namespace).await?)
            }
            Middleware::Logging => Arc::new(LoggingStorage::new(inner, span.clone())),
        })
    }
}

/// Apply `middleware` around `base` in order.
pub async fn compose(
    base: StorageProviderRef,
    middleware: &[Middleware],
    span: &Span,
) -> Result<StorageProviderRef, StorageError> {
    let mut provider = base;
    for layer in middleware {
        provider = layer.wrap(provider, span).await?;
    }
    Ok(provider)
}

/// Build the base backend for `source`.
pub async fn build_backend(source: &SourceConfig) -> Result<StorageProviderRef, StorageError> {
    Ok(match BackendConfig::parse_url(&source.bucket)? {
        BackendConfig::Memory => Arc::new(ObjectStoreBackend::memory()),
        BackendConfig::Local { path } => Arc::new(ObjectStoreBackend::local(&path).await?),
        BackendConfig::Gcs { bucket, prefix } => {
            let options = GcsOptions {
                bucket,
                prefix,
                metadata_key: source.metadata_key.clone(),
                endpoint: source.endpoint.clone(),
                credentials_file: source.credentials_file.clone(),
            };
            Arc::new(GcsBackend::connect(options).await?)
        }
    })
}

/// Build the backend for `source` wrapped in its middleware.
///
/// Any failure here is fatal: credentials that cannot be fetched or a
/// processed database that cannot be opened.
pub async fn build_storage(
    source: &SourceConfig,
    span: &Span,
) -> Result<StorageProviderRef, StorageError> {
    let base = build_backend(source).await?;
    compose(base, &Middleware::for_source(source), span).await
}
