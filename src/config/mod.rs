//! Configuration loading and validation.
//!
//! Configuration is read from a YAML file after environment variable
//! interpolation, then validated once. Everything downstream receives an
//! already validated [`Config`].

mod vars;

use globset::GlobMatcher;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::Path;
use std::time::Duration;

use crate::codec::CodecKind;
use crate::error::{
    BlankMetadataKeySnafu, ConfigError, EmptyBucketSnafu, EnvInterpolationSnafu, InvalidGlobSnafu,
    NonPositiveIntervalSnafu, QueueCapacityTooLargeSnafu, ReadFileSnafu, YamlParseSnafu,
    ZeroQueueCapacitySnafu,
};

/// Largest accepted `queue_capacity`; tokio's bounded channel panics well
/// above this.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

/// Metadata value marking an object as fully ingested.
pub const PROCESSED_MARKER: &str = "processed";

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Metrics configuration (optional, disabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Where objects come from and how processed state is tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Backing store: `gs://bucket[/prefix]`, a bare bucket name,
    /// `file://dir` (kept relative or absolute as written), `/abs/dir` or
    /// `memory://`. Local roots must already exist.
    pub bucket: String,

    /// Service account JSON used for GCS authentication.
    #[serde(default)]
    pub credentials_file: Option<String>,

    /// Object metadata key holding the processed marker.
    #[serde(default = "default_metadata_key")]
    pub metadata_key: String,

    /// SQLite file that tracks processed objects locally.
    #[serde(default)]
    pub processed_db_path: Option<String>,

    /// Override for the GCS JSON API endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_metadata_key() -> String {
    "x-goog-meta-sleet".to_string()
}

/// How discovered objects are filtered, decoded and finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Seconds between discovery cycles (default: 60).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Objects must match this glob to be ingested (default: `*`).
    #[serde(default = "default_file_matches")]
    pub file_matches: String,

    /// Objects matching this glob are skipped. Empty disables exclusion.
    #[serde(default)]
    pub file_exclude: String,

    #[serde(default)]
    pub codec: CodecKind,

    /// Delete objects after ingestion instead of marking them.
    #[serde(default)]
    pub delete: bool,

    /// Decompress `.gz` and `.zst` objects before decoding.
    #[serde(default)]
    pub unpack_gzip: bool,

    /// Capacity of the queue between discovery and download (default: 16).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            file_matches: default_file_matches(),
            file_exclude: String::new(),
            codec: CodecKind::default(),
            delete: false,
            unpack_gzip: false,
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_file_matches() -> String {
    "*".to_string()
}

fn default_queue_capacity() -> usize {
    16
}

impl IngestConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Compile the include and exclude globs.
    pub fn file_filter(&self) -> Result<FileFilter, ConfigError> {
        FileFilter::new(&self.file_matches, &self.file_exclude)
    }

    /// Check the settings the pipeline cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(self.poll_interval_secs > 0, NonPositiveIntervalSnafu);
        ensure!(self.queue_capacity > 0, ZeroQueueCapacitySnafu);
        ensure!(
            self.queue_capacity <= MAX_QUEUE_CAPACITY,
            QueueCapacityTooLargeSnafu {
                capacity: self.queue_capacity,
                max: MAX_QUEUE_CAPACITY,
            }
        );
        self.file_filter()?;
        Ok(())
    }
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

/// Compiled include/exclude globs.
///
/// `*` matches across `/`, so `*.log` also matches `dir/a.log`.
#[derive(Debug, Clone)]
pub struct FileFilter {
    include: GlobMatcher,
    exclude: Option<GlobMatcher>,
}

impl FileFilter {
    pub fn new(include: &str, exclude: &str) -> Result<Self, ConfigError> {
        let include = compile("file_matches", include)?;
        let exclude = if exclude.is_empty() {
            None
        } else {
            Some(compile("file_exclude", exclude)?)
        };
        Ok(Self { include, exclude })
    }

    pub fn is_included(&self, path: &str) -> bool {
        self.include.is_match(path)
    }

    /// False when exclusion is disabled.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude.as_ref().is_some_and(|glob| glob.is_match(path))
    }

    pub fn include_pattern(&self) -> &str {
        self.include.glob().glob()
    }

    pub fn exclude_pattern(&self) -> Option<&str> {
        self.exclude.as_ref().map(|glob| glob.glob().glob())
    }
}

fn compile(field: &'static str, pattern: &str) -> Result<GlobMatcher, ConfigError> {
    let glob = globset::GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()
        .context(InvalidGlobSnafu { field, pattern })?;
    Ok(glob.compile_matcher())
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;

        let content = if interpolate_env {
            vars::interpolate(&content).map_err(|problems| {
                EnvInterpolationSnafu {
                    message: problems.join("\n"),
                }
                .build()
            })?
        } else {
            content
        };

        Self::from_yaml(&content)
    }

    /// Parse and validate YAML without interpolation.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content).context(YamlParseSnafu)?;
        config.validated()
    }

    /// Normalize and validate the configuration.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.source.bucket = self.source.bucket.trim().to_string();
        self.source.metadata_key = self.source.metadata_key.trim().to_string();

        ensure!(!self.source.bucket.is_empty(), EmptyBucketSnafu);
        ensure!(!self.source.metadata_key.is_empty(), BlankMetadataKeySnafu);
        self.ingest.validate()?;

        Ok(self)
    }

    /// Construct a config for `bucket` with every other setting at its default.
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        Self {
            source: SourceConfig {
                bucket: bucket.into(),
                credentials_file: None,
                metadata_key: default_metadata_key(),
                processed_db_path: None,
                endpoint: None,
            },
            ingest: IngestConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}
