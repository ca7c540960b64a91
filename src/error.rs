//! Error types for Sleet using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// The object does not exist in the backing store.
    #[snafu(display("Object not found: {path}"))]
    NotFound { path: String },

    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// HTTP request to the storage API failed.
    #[snafu(display("Storage request failed: {source}"))]
    Http { source: reqwest::Error },

    /// The storage API answered with a status we do not handle.
    #[snafu(display("Unexpected status {status} for {path}: {body}"))]
    UnexpectedStatus {
        status: u16,
        path: String,
        body: String,
    },

    /// Could not obtain credentials for the storage API.
    #[snafu(display("Failed to obtain storage credentials: {source}"))]
    Credentials { source: object_store::Error },

    /// The local processed database is unusable.
    #[snafu(display("Processed database error: {source}"))]
    Persistence { source: sqlx::Error },

    /// The configured local root cannot be used.
    #[snafu(display("Local root {path} is not usable: {source}"))]
    LocalRoot {
        path: String,
        source: std::io::Error,
    },

    /// The configured local root exists but is not a directory.
    #[snafu(display("Local root {path} is not a directory"))]
    NotADirectory { path: String },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound { .. } => true,
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }

    /// Map an object store error for `path`, folding missing objects into `NotFound`.
    pub(crate) fn from_object_store(path: &str, source: object_store::Error) -> Self {
        match source {
            object_store::Error::NotFound { .. } => StorageError::NotFound {
                path: path.to_string(),
            },
            source => StorageError::ObjectStore { source },
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Codec identifier is not one of the known kinds.
    #[snafu(display("Unknown codec '{codec}', valid codecs are: {valid}"))]
    UnknownCodec { codec: String, valid: String },

    /// Poll interval must be positive.
    #[snafu(display("Poll interval must be positive"))]
    NonPositiveInterval,

    /// Bucket identifier is empty.
    #[snafu(display("Source bucket cannot be empty"))]
    EmptyBucket,

    /// Metadata key is empty after trimming.
    #[snafu(display("The metadata key must not be blank"))]
    BlankMetadataKey,

    /// Handoff queue needs room for at least one path.
    #[snafu(display("Queue capacity must be at least 1"))]
    ZeroQueueCapacity,

    /// Handoff queue capacity beyond what a bounded channel supports.
    #[snafu(display("Queue capacity {capacity} exceeds the maximum of {max}"))]
    QueueCapacityTooLarge { capacity: usize, max: usize },

    /// A configured glob does not compile.
    #[snafu(display("The {field} parameter is not a valid glob: {pattern}"))]
    InvalidGlob {
        field: &'static str,
        pattern: String,
        source: globset::Error,
    },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file: {source}"))]
    ReadFile { source: std::io::Error },
}

// ============ Codec Errors ============

/// Errors that stop a codec before its input is exhausted.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CodecError {
    /// Reading the underlying byte stream failed.
    #[snafu(display("Failed to read input: {source}"))]
    Read { source: std::io::Error },

    /// The input of an array codec does not open with `[`.
    #[snafu(display("Invalid start token for array parsing: {found}"))]
    InvalidArrayStart { found: String },

    /// Input ended in the middle of a value or before the closing `]`.
    #[snafu(display("Unexpected end of input"))]
    Truncated,

    /// Array elements must be separated by `,`.
    #[snafu(display("Expected ',' or ']' after array element, found {found}"))]
    MissingSeparator { found: String },

    /// A value failed to parse as JSON.
    #[snafu(display("Invalid JSON: {source}"))]
    Json { source: serde_json::Error },
}

// ============ Publish Errors ============

/// Errors raised by the downstream publish sink.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PublishError {
    /// The receiving side of the sink is gone.
    #[snafu(display("Publish sink is closed"))]
    Closed,

    /// Writing the event failed.
    #[snafu(display("Failed to write event: {source}"))]
    Write { source: std::io::Error },

    /// Serializing the event failed.
    #[snafu(display("Failed to serialize event: {source}"))]
    Serialize { source: serde_json::Error },
}

// ============ Ingest Errors ============

/// Per-file failures inside the download loop. Never fatal to the loop.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IngestError {
    /// Opening the object failed.
    #[snafu(display("Failed to read {path}: {source}"))]
    Open { path: String, source: StorageError },

    /// Setting up the decompressor failed.
    #[snafu(display("Failed to decompress {path}: {source}"))]
    Decompress {
        path: String,
        source: std::io::Error,
    },

    /// The codec stopped with an error.
    #[snafu(display("Failed to decode {path}: {source}"))]
    Decode { path: String, source: CodecError },

    /// The sink rejected a record.
    #[snafu(display("Failed to publish record from {path}: {source}"))]
    Publish { path: String, source: PublishError },

    /// The blocking decode task panicked or was cancelled.
    #[snafu(display("Decode task for {path} did not complete: {source}"))]
    DecodeTask {
        path: String,
        source: tokio::task::JoinError,
    },

    /// Removing or marking the object failed.
    #[snafu(display("Failed to finalize {path}: {source}"))]
    Finalize { path: String, source: StorageError },
}

impl IngestError {
    /// True when the object disappeared between listing and reading or finalizing.
    pub fn is_not_found(&self) -> bool {
        match self {
            IngestError::Open { source, .. } | IngestError::Finalize { source, .. } => {
                source.is_not_found()
            }
            _ => false,
        }
    }
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Storage error.
    #[snafu(display("Storage error: {source}"))]
    PipelineStorage { source: StorageError },

    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Task join error.
    #[snafu(display("Task join error: {source}"))]
    TaskJoin { source: tokio::task::JoinError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },
}

impl PipelineError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            PipelineError::PipelineStorage { source } => source.is_not_found(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err = StorageError::NotFound {
            path: "a.log".to_string(),
        };
        assert!(err.is_not_found());

        let err = StorageError::UnexpectedStatus {
            status: 500,
            path: "a.log".to_string(),
            body: String::new(),
        };
        assert!(!err.is_not_found());

        let err = PipelineError::PipelineStorage {
            source: StorageError::NotFound {
                path: "a.log".to_string(),
            },
        };
        assert!(err.is_not_found());
    }

    #[test]
    fn test_object_store_not_found_is_folded() {
        let source = object_store::Error::NotFound {
            path: "a.log".to_string(),
            source: "missing".into(),
        };
        let err = StorageError::from_object_store("a.log", source);
        assert!(matches!(err, StorageError::NotFound { ref path } if path == "a.log"));
    }
}
