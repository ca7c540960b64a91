//! The two long-running pipeline tasks.
//!
//! Discovery produces paths onto a bounded queue; download consumes them one
//! at a time. They share only the queue and the [`PendingSet`](super::PendingSet).

mod discovery;
mod download;

pub(super) use discovery::Discovery;
pub(super) use download::{Downloader, Finalize, IngestSettings};
