//! # Capture
//!
//! Turns a directory tree into a [`Snapshot`]. The walk is single-threaded:
//! the builder's open-directory stack relies on receiving events in exact
//! pre-order.

mod builder;
mod probe;
mod walk;

pub use builder::{TreeBuilder, Visit};
pub use probe::{LocalFs, MetadataProbe};
pub use walk::{Walk, WalkEvent};

use std::path::Path;

use tracing::{info, warn};

use crate::common::Snapshot;
use crate::error::Result;

/// What to do when a directory cannot be listed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WalkErrorPolicy {
    /// Log a warning and leave the subtree out of the snapshot.
    #[default]
    SkipAndWarn,
    /// Stop the capture with the walk error.
    Abort,
}

#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    /// Excluded directories as path segments relative to the base.
    pub excludes: Vec<Vec<String>>,
    pub on_error: WalkErrorPolicy,
}

/// Normalizes an exclude path into segments relative to the capture base.
///
/// `/var/`, `var`, `./var` and `var/` all yield `["var"]`.
pub fn exclude_segments(path: &str) -> Vec<String> {
    path.replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .map(str::to_string)
        .collect()
}

/// Captures the tree under `base` from the local filesystem.
pub fn capture(base: &Path, options: &CaptureOptions) -> Result<Snapshot> {
    capture_with(base, LocalFs, options)
}

pub fn capture_with<P: MetadataProbe>(base: &Path, probe: P, options: &CaptureOptions) -> Result<Snapshot> {
    let mut walk = Walk::new(base);
    let mut builder = TreeBuilder::new(base, probe, options.excludes.iter().cloned());
    let mut skipped = 0u64;

    // `walk` must stay reachable inside the loop for pruning.
    while let Some(event) = walk.next() {
        let event = match event {
            Ok(event) => event,
            Err(err) => match options.on_error {
                WalkErrorPolicy::Abort => return Err(err),
                WalkErrorPolicy::SkipAndWarn => {
                    warn!(error = %err, "skipping unreadable directory");
                    skipped += 1;
                    continue;
                }
            },
        };
        if builder.visit(&event)? == Visit::Pruned {
            walk.prune();
        }
    }

    let snapshot = builder.finish();
    let stats = snapshot.stats();
    info!(
        base = %base.display(),
        files = stats.files,
        dirs = stats.directories,
        links = stats.links,
        bytes = snapshot.size,
        skipped,
        "capture complete"
    );
    Ok(snapshot)
}
