//! Internal events for metrics emission.
//!
//! Each struct is a measurable occurrence in the pipeline and knows which
//! Prometheus series it feeds.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

// ============================================================================
// Discovery
// ============================================================================

/// Outcome of one discovery cycle.
#[derive(Debug, Clone, Copy)]
pub enum CycleResult {
    Success,
    ListFailed,
}

impl CycleResult {
    fn as_str(&self) -> &'static str {
        match self {
            CycleResult::Success => "success",
            CycleResult::ListFailed => "list_failed",
        }
    }
}

pub struct DiscoveryCycle {
    pub result: CycleResult,
}

impl InternalEvent for DiscoveryCycle {
    fn emit(self) {
        trace!(result = self.result.as_str(), "Discovery cycle");
        counter!("sleet_discovery_cycles_total", "result" => self.result.as_str()).increment(1);
    }
}

/// Paths pushed onto the handoff queue.
pub struct FilesDiscovered {
    pub count: u64,
}

impl InternalEvent for FilesDiscovered {
    fn emit(self) {
        trace!(count = self.count, "Files discovered");
        counter!("sleet_files_discovered_total").increment(self.count);
    }
}

pub struct PendingFiles {
    pub count: usize,
}

impl InternalEvent for PendingFiles {
    fn emit(self) {
        trace!(count = self.count, "Pending files");
        gauge!("sleet_pending_files").set(self.count as f64);
    }
}

pub struct QueueDepth {
    pub count: usize,
}

impl InternalEvent for QueueDepth {
    fn emit(self) {
        trace!(count = self.count, "Queue depth");
        gauge!("sleet_queue_depth").set(self.count as f64);
    }
}

// ============================================================================
// Download
// ============================================================================

/// Status of an ingested file.
#[derive(Debug, Clone, Copy)]
pub enum FileStatus {
    Success,
    Skipped,
    Failed,
}

impl FileStatus {
    fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Success => "success",
            FileStatus::Skipped => "skipped",
            FileStatus::Failed => "failed",
        }
    }
}

pub struct FileProcessed {
    pub status: FileStatus,
}

impl InternalEvent for FileProcessed {
    fn emit(self) {
        trace!(status = self.status.as_str(), "File processed");
        counter!("sleet_files_processed_total", "status" => self.status.as_str()).increment(1);
    }
}

pub struct RecordsPublished {
    pub count: u64,
}

impl InternalEvent for RecordsPublished {
    fn emit(self) {
        trace!(count = self.count, "Records published");
        counter!("sleet_records_published_total").increment(self.count);
    }
}

/// Time from dequeue to finalize for one file.
pub struct FileIngestDuration {
    pub duration: Duration,
}

impl InternalEvent for FileIngestDuration {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            "File ingest completed"
        );
        histogram!("sleet_file_ingest_duration_seconds").record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage provider operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOperation {
    ListUnprocessed,
    Read,
    Remove,
    WasProcessed,
    MarkProcessed,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::ListUnprocessed => "list_unprocessed",
            StorageOperation::Read => "read",
            StorageOperation::Remove => "remove",
            StorageOperation::WasProcessed => "was_processed",
            StorageOperation::MarkProcessed => "mark_processed",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "sleet_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request duration"
        );
        histogram!(
            "sleet_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
