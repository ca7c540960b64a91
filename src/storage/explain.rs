//! Diagnostic trace of every filter applied to a file listing.
//!
//! Each filter logs one summary line at info and one line per file at debug,
//! so running with `RUST_LOG=sleet=debug` shows why a file was or was not
//! picked up.

use tracing::{debug, info};

/// Keep the files for which `keep` returns true, logging the outcome.
pub fn filter_and_explain<F>(test: &str, files: Vec<String>, mut keep: F) -> Vec<String>
where
    F: FnMut(&str) -> bool,
{
    let total = files.len();
    debug!("Test: {test}?");

    let passed: Vec<String> = files
        .into_iter()
        .filter(|file| {
            let pass = keep(file);
            debug!(" - {file:?} ({})", if pass { "pass" } else { "fail" });
            pass
        })
        .collect();

    info!("Test: {test}? passed {} of {total} files", passed.len());
    passed
}

/// Log what a source listing returned.
pub fn explain_found_files(source: &str, files: &[String]) {
    info!("Source {source:?} found {} files", files.len());
    for file in files {
        debug!(" - {file:?}");
    }
}
