//! Middleware that keeps processed marks in a local SQLite file.
//!
//! Useful when the bucket cannot or should not carry processed metadata.
//! Several configurations can share one database file: marks are namespaced
//! by the configured metadata key.

use async_trait::async_trait;
use snafu::prelude::*;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use crate::config::PROCESSED_MARKER;
use crate::error::{PersistenceSnafu, StorageError};

use super::{ObjectReader, StorageProvider, StorageProviderRef, filter_and_explain};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS processed_objects (
    namespace TEXT NOT NULL,
    path TEXT NOT NULL,
    marker TEXT NOT NULL,
    PRIMARY KEY (namespace, path)
)";

#[derive(Debug)]
pub struct ProcessedCache {
    inner: StorageProviderRef,
    pool: SqlitePool,
    db_path: String,
    namespace: String,
}

impl ProcessedCache {
    /// Open (or create) the database at `db_path`. Failure is fatal to the
    /// caller; there is no fallback when the database is unusable.
    pub async fn open(
        inner: StorageProviderRef,
        db_path: &str,
        namespace: &str,
    ) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context(PersistenceSnafu)?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .context(PersistenceSnafu)?;

        debug!(db_path, namespace, "Opened processed database");

        Ok(Self {
            inner,
            pool,
            db_path: db_path.to_string(),
            namespace: namespace.to_string(),
        })
    }

    async fn processed_paths(&self) -> Result<HashSet<String>, StorageError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT path FROM processed_objects WHERE namespace = ?")
                .bind(&self.namespace)
                .fetch_all(&self.pool)
                .await
                .context(PersistenceSnafu)?;
        Ok(rows.into_iter().map(|(path,)| path).collect())
    }
}

#[async_trait]
impl StorageProvider for ProcessedCache {
    async fn list_unprocessed(&self) -> Result<Vec<String>, StorageError> {
        let listed = self.inner.list_unprocessed().await?;
        let processed = self.processed_paths().await?;

        let test = format!("absent from processed db {:?}", self.db_path);
        Ok(filter_and_explain(&test, listed, |path| {
            !processed.contains(path)
        }))
    }

    async fn read(&self, path: &str) -> Result<ObjectReader, StorageError> {
        self.inner.read(path).await
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        // Only forget the mark once the object is really gone.
        self.inner.remove(path).await?;

        sqlx::query("DELETE FROM processed_objects WHERE namespace = ? AND path = ?")
            .bind(&self.namespace)
            .bind(path)
            .execute(&self.pool)
            .await
            .context(PersistenceSnafu)?;
        Ok(())
    }

    async fn was_processed(&self, path: &str) -> Result<bool, StorageError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT marker FROM processed_objects WHERE namespace = ? AND path = ?",
        )
        .bind(&self.namespace)
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .context(PersistenceSnafu)?;
        Ok(row.is_some())
    }

    async fn mark_processed(&self, path: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT OR REPLACE INTO processed_objects (namespace, path, marker) VALUES (?, ?, ?)",
        )
        .bind(&self.namespace)
        .bind(path)
        .bind(PROCESSED_MARKER)
        .execute(&self.pool)
        .await
        .context(PersistenceSnafu)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} (processed db {})", self.inner.describe(), self.db_path)
    }
}
