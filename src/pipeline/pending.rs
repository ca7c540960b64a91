//! Paths currently queued or being downloaded.

use dashmap::DashSet;
use std::sync::Arc;

/// Concurrent set shared by the discovery and download tasks.
///
/// Discovery inserts a path before queueing it; download removes it once the
/// file is finished, whatever the outcome. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct PendingSet {
    paths: Arc<DashSet<String>>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the path was already pending.
    pub fn insert(&self, path: &str) -> bool {
        self.paths.insert(path.to_string())
    }

    pub fn remove(&self, path: &str) -> bool {
        self.paths.remove(path).is_some()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
