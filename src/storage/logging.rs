//! Pass-through middleware that logs and meters every storage call.

use async_trait::async_trait;
use std::future::Future;
use std::time::Instant;
use tracing::{Instrument, Span, error, info};

use crate::emit;
use crate::error::StorageError;
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

use super::{ObjectReader, StorageProvider, StorageProviderRef};

#[derive(Debug)]
pub struct LoggingStorage {
    inner: StorageProviderRef,
    span: Span,
}

impl LoggingStorage {
    pub fn new(inner: StorageProviderRef, span: Span) -> Self {
        Self { inner, span }
    }

    /// Run `call` inside the injected span, recording its outcome.
    async fn observe<T, F>(
        &self,
        operation: StorageOperation,
        call: F,
    ) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let start = Instant::now();
        let result = call.instrument(self.span.clone()).await;

        emit!(StorageRequest {
            operation,
            status: if result.is_ok() {
                RequestStatus::Success
            } else {
                RequestStatus::Error
            },
        });
        emit!(StorageRequestDuration {
            operation,
            duration: start.elapsed(),
        });

        result
    }
}

#[async_trait]
impl StorageProvider for LoggingStorage {
    async fn list_unprocessed(&self) -> Result<Vec<String>, StorageError> {
        self.span.in_scope(|| info!("Fetching file list from {}", self.inner.describe()));
        let result = self
            .observe(StorageOperation::ListUnprocessed, self.inner.list_unprocessed())
            .await;
        if let Err(e) = &result {
            self.span
                .in_scope(|| error!(error = %e, "Could not fetch list of files"));
        }
        result
    }

    async fn read(&self, path: &str) -> Result<ObjectReader, StorageError> {
        self.span.in_scope(|| info!(path, "Reading file"));
        let result = self
            .observe(StorageOperation::Read, self.inner.read(path))
            .await;
        if let Err(e) = &result {
            self.span
                .in_scope(|| error!(path, error = %e, "Error reading file"));
        }
        result
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        self.span.in_scope(|| info!(path, "Deleting file"));
        let result = self
            .observe(StorageOperation::Remove, self.inner.remove(path))
            .await;
        if let Err(e) = &result {
            self.span
                .in_scope(|| error!(path, error = %e, "Error deleting file"));
        }
        result
    }

    async fn was_processed(&self, path: &str) -> Result<bool, StorageError> {
        self.span
            .in_scope(|| info!(path, "Checking if file was processed already"));
        let result = self
            .observe(StorageOperation::WasProcessed, self.inner.was_processed(path))
            .await;
        if let Err(e) = &result {
            self.span.in_scope(
                || error!(path, error = %e, "Error checking if file was processed"),
            );
        }
        result
    }

    async fn mark_processed(&self, path: &str) -> Result<(), StorageError> {
        self.span.in_scope(|| info!(path, "Marking file as processed"));
        let result = self
            .observe(StorageOperation::MarkProcessed, self.inner.mark_processed(path))
            .await;
        if let Err(e) = &result {
            self.span.in_scope(
                || error!(path, error = %e, "Error marking file as processed"),
            );
        }
        result
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ObjectStoreBackend;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_results_pass_through_unchanged() {
        let base = Arc::new(ObjectStoreBackend::memory());
        base.store()
            .put(
                &object_store::path::Path::from("a.log"),
                object_store::PutPayload::from_static(b"x"),
            )
            .await
            .unwrap();

        let logged = LoggingStorage::new(base.clone(), tracing::info_span!("storage"));
        assert_eq!(logged.list_unprocessed().await.unwrap(), vec!["a.log"]);

        logged.mark_processed("a.log").await.unwrap();
        assert!(logged.was_processed("a.log").await.unwrap());
        assert!(base.was_processed("a.log").await.unwrap());
        assert!(logged.list_unprocessed().await.unwrap().is_empty());

        let err = logged.remove("missing.log").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(logged.describe(), "memory://");
    }
}
