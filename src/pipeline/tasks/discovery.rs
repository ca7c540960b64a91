//! Background discovery task.
//!
//! Lists unprocessed objects on a fixed interval and queues the ones that
//! pass the pending, include and exclude filters.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, warn};

use crate::config::FileFilter;
use crate::emit;
use crate::metrics::events::{CycleResult, DiscoveryCycle, FilesDiscovered, PendingFiles};
use crate::pipeline::PendingSet;
use crate::storage::{StorageProviderRef, explain_found_files, filter_and_explain};

/// Why a discovery cycle stopped before pushing all of its files.
enum Interrupted {
    Shutdown,
    QueueClosed,
}

/// Handle to the background discovery task.
pub(in crate::pipeline) struct Discovery {
    handle: JoinHandle<u64>,
}

impl Discovery {
    /// Spawn the discovery task. It runs until `shutdown` is cancelled or the
    /// download side drops its receiver.
    pub fn spawn(
        storage: StorageProviderRef,
        filter: FileFilter,
        pending: PendingSet,
        tx: mpsc::Sender<String>,
        poll_interval: Duration,
        shutdown: CancellationToken,
        span: Span,
    ) -> Self {
        let task = DiscoveryLoop {
            storage,
            filter,
            pending,
            tx,
            shutdown,
        };
        let handle = tokio::spawn(task.run(poll_interval).instrument(span));
        Self { handle }
    }

    /// Wait for the task and return the number of files it queued.
    pub async fn join(self) -> Result<u64, tokio::task::JoinError> {
        self.handle.await
    }
}

struct DiscoveryLoop {
    storage: StorageProviderRef,
    filter: FileFilter,
    pending: PendingSet,
    tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
}

impl DiscoveryLoop {
    async fn run(self, poll_interval: Duration) -> u64 {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut discovered = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.cycle().await {
                Ok(count) => discovered += count,
                Err((count, Interrupted::Shutdown)) => {
                    discovered += count;
                    break;
                }
                Err((count, Interrupted::QueueClosed)) => {
                    discovered += count;
                    warn!("Download queue closed, stopping discovery");
                    break;
                }
            }
        }

        debug!(discovered, "Discovery stopped");
        discovered
    }

    /// One listing pass. Returns how many files were queued.
    async fn cycle(&self) -> Result<u64, (u64, Interrupted)> {
        let listing = match self
            .shutdown
            .run_until_cancelled(self.storage.list_unprocessed())
            .await
        {
            Some(Ok(files)) => files,
            Some(Err(e)) => {
                warn!(error = %e, "Listing failed, skipping this cycle");
                emit!(DiscoveryCycle {
                    result: CycleResult::ListFailed
                });
                return Ok(0);
            }
            None => return Err((0, Interrupted::Shutdown)),
        };
        emit!(DiscoveryCycle {
            result: CycleResult::Success
        });

        explain_found_files(&self.storage.describe(), &listing);
        let files = self.select(listing);

        let mut queued = 0;
        for path in files {
            match self.push(path).await {
                Ok(()) => {
                    queued += 1;
                    emit!(FilesDiscovered { count: 1 });
                }
                Err(reason) => return Err((queued, reason)),
            }
        }
        Ok(queued)
    }

    fn select(&self, listing: Vec<String>) -> Vec<String> {
        let files = filter_and_explain("not already pending", listing, |path| {
            !self.pending.contains(path)
        });

        let test = format!("matches {:?}", self.filter.include_pattern());
        let files = filter_and_explain(&test, files, |path| self.filter.is_included(path));

        match self.filter.exclude_pattern() {
            Some(pattern) => {
                let test = format!("does not match {pattern:?}");
                filter_and_explain(&test, files, |path| !self.filter.is_excluded(path))
            }
            None => files,
        }
    }

    /// Mark `path` pending and push it onto the queue, waiting for room.
    async fn push(&self, path: String) -> Result<(), Interrupted> {
        if !self.pending.insert(&path) {
            return Ok(());
        }
        emit!(PendingFiles {
            count: self.pending.len()
        });

        let permit = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(Interrupted::Shutdown),
            permit = self.tx.reserve() => permit.map_err(|_| Interrupted::QueueClosed),
        };

        match permit {
            Ok(permit) => {
                debug!(path, "Queued");
                permit.send(path);
                Ok(())
            }
            Err(reason) => {
                self.pending.remove(&path);
                emit!(PendingFiles {
                    count: self.pending.len()
                });
                Err(reason)
            }
        }
    }
}
