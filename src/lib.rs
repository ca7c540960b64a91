//! sleet: watches a bucket for new files, decodes them into records and
//! forwards the records downstream.
//!
//! Objects are listed on an interval, filtered by glob, decoded with one of
//! five codecs and published one record at a time. Each object is then
//! removed or marked processed so it is never ingested twice.
//!
//! # Example
//!
//! ```ignore
//! use sleet::{Config, run_pipeline, error::PipelineError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("sleet.yaml").expect("valid configuration");
//!     let stats = run_pipeline(config).await?;
//!     println!("Published {} records", stats.records_published);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod storage;

// Re-export main types
pub use config::Config;
pub use pipeline::{Pipeline, PipelineStats, run_pipeline};
pub use sink::{Event, Publisher, PublisherRef};
pub use storage::{StorageProvider, StorageProviderRef};
