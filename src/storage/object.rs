//! Backend over an `object_store` store: a local directory or memory.
//!
//! Processed marks live only in this process.

use async_trait::async_trait;
use dashmap::DashSet;
use futures::{StreamExt, TryStreamExt};
use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use snafu::prelude::*;
use std::sync::Arc;
use tokio_util::io::StreamReader;

use crate::error::{LocalRootSnafu, NotADirectorySnafu, ObjectStoreSnafu, StorageError};

use super::{ObjectReader, StorageProvider, filter_and_explain};

pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    description: String,
    processed: DashSet<String>,
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectStoreBackend<{}>", self.description)
    }
}

impl ObjectStoreBackend {
    /// An existing directory on the local filesystem. A missing root is an
    /// error, never created.
    pub async fn local(path: &str) -> Result<Self, StorageError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .context(LocalRootSnafu { path })?;
        ensure!(metadata.is_dir(), NotADirectorySnafu { path });
        let store = LocalFileSystem::new_with_prefix(path).context(ObjectStoreSnafu)?;
        Ok(Self::from_store(Arc::new(store), format!("file://{path}")))
    }

    /// An empty in-memory store.
    pub fn memory() -> Self {
        Self::from_store(Arc::new(InMemory::new()), "memory://".to_string())
    }

    /// Wrap an existing store.
    pub fn from_store(store: Arc<dyn ObjectStore>, description: String) -> Self {
        Self {
            store,
            description,
            processed: DashSet::new(),
        }
    }

    /// The wrapped store.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }
}

#[async_trait]
impl StorageProvider for ObjectStoreBackend {
    async fn list_unprocessed(&self) -> Result<Vec<String>, StorageError> {
        let mut paths: Vec<String> = self
            .store
            .list(None)
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .context(ObjectStoreSnafu)?;

        paths.sort();
        Ok(filter_and_explain("not marked processed", paths, |path| {
            !self.processed.contains(path)
        }))
    }

    async fn read(&self, path: &str) -> Result<ObjectReader, StorageError> {
        let result = self
            .store
            .get(&Path::from(path))
            .await
            .map_err(|e| StorageError::from_object_store(path, e))?;

        let stream = result.into_stream().map_err(std::io::Error::from).boxed();
        Ok(Box::new(StreamReader::new(stream)))
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        let location = Path::from(path);
        // Some stores treat deleting a missing object as success.
        self.store
            .head(&location)
            .await
            .map_err(|e| StorageError::from_object_store(path, e))?;
        self.store
            .delete(&location)
            .await
            .map_err(|e| StorageError::from_object_store(path, e))?;

        self.processed.remove(path);
        Ok(())
    }

    async fn was_processed(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.processed.contains(path))
    }

    async fn mark_processed(&self, path: &str) -> Result<(), StorageError> {
        self.processed.insert(path.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}
