//! # Reconstruction
//!
//! Rebuilds a filesystem from a decoded [`Snapshot`]: the tree is flattened
//! into work items, and a small worker pool fetches each file from the origin
//! and restores its ownership and permission bits.

mod fetch;
mod flatten;
mod pool;

pub use fetch::{CommandFetcher, Fetcher};
pub use flatten::{flatten, Flatten, RestoreTarget, WorkItem};
pub use pool::{LinkPolicy, PoolOptions, ReconstructionPool, RestoreReport, DEFAULT_PAUSE, DEFAULT_WORKERS};

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::common::{Snapshot, FORMAT_VERSION};
use crate::error::{Result, SnapshotError};
use crate::fsx;

/// Restores `snapshot` under `target.dest_root`.
///
/// Only a version mismatch or an unusable destination root is fatal; every
/// per-file problem ends up in the returned report instead.
pub fn restore<F>(
    snapshot: &Snapshot,
    target: RestoreTarget,
    options: PoolOptions,
    fetcher: &F,
    shutdown: Arc<AtomicBool>,
) -> Result<RestoreReport>
where
    F: Fetcher + ?Sized,
{
    if snapshot.version != FORMAT_VERSION {
        return Err(SnapshotError::FormatVersion { found: Some(u64::from(snapshot.version)), expected: FORMAT_VERSION });
    }

    let root = &target.dest_root;
    fsx::create_dir_all(root).map_err(|e| SnapshotError::io(root, e))?;
    let meta = fsx::metadata(root).map_err(|e| SnapshotError::io(root, e))?;
    if meta.permissions().readonly() {
        return Err(SnapshotError::Config(format!("destination '{}' is not writable", root.display())));
    }

    let pool = ReconstructionPool::new(options, shutdown);
    Ok(pool.run(flatten(&snapshot.fsroot, target), fetcher))
}
