//! Bounded worker pool that materializes work items.
//!
//! One producer (the caller's thread) feeds a bounded channel from the lazy
//! flattener; `workers` threads drain it. Workers share nothing mutable:
//! each keeps its own [`RestoreReport`], merged once every thread has joined.
//! Failures stay inside the item that caused them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, error, info, warn};

use super::fetch::Fetcher;
use super::flatten::WorkItem;
use crate::common::PERMISSION_MASK;
use crate::error::{FetchError, ItemError};
use crate::fsx;

pub const DEFAULT_WORKERS: usize = 3;
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(2);

const PAUSE_SLICE: Duration = Duration::from_millis(100);

/// How symbolic links found in a snapshot are restored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkPolicy {
    /// Download the link path from the origin like a regular file.
    #[default]
    Fetch,
    /// Recreate the link locally with its recorded target.
    Recreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub workers: usize,
    /// Delay after every actual fetch, to go easy on the origin.
    pub pause: Duration,
    pub link_policy: LinkPolicy,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self { workers: DEFAULT_WORKERS, pause: DEFAULT_PAUSE, link_policy: LinkPolicy::Fetch }
    }
}

/// Outcome of a reconstruction run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// Items handed to a worker.
    pub processed: u64,
    /// Successful network fetches.
    pub fetched: u64,
    /// Items whose destination already existed; no fetch was made.
    pub already_present: u64,
    pub links_created: u64,
    /// Items whose ownership and mode were both applied.
    pub permissions_applied: u64,
    pub permission_failures: u64,
    /// Destinations that could not be produced.
    pub unresolved: Vec<PathBuf>,
    pub interrupted: bool,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty() && !self.interrupted
    }

    fn absorb(&mut self, other: RestoreReport) {
        self.processed += other.processed;
        self.fetched += other.fetched;
        self.already_present += other.already_present;
        self.links_created += other.links_created;
        self.permissions_applied += other.permissions_applied;
        self.permission_failures += other.permission_failures;
        self.unresolved.extend(other.unresolved);
    }
}

pub struct ReconstructionPool {
    options: PoolOptions,
    shutdown: Arc<AtomicBool>,
}

impl ReconstructionPool {
    pub fn new(options: PoolOptions, shutdown: Arc<AtomicBool>) -> Self {
        Self { options, shutdown }
    }

    /// Get a clone of the shutdown flag (for signal handlers)
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Runs every item through the pool. Returns once all workers have
    /// exited, either because the items ran out or shutdown was requested.
    pub fn run<I, F>(&self, items: I, fetcher: &F) -> RestoreReport
    where
        I: IntoIterator<Item = WorkItem>,
        F: Fetcher + ?Sized,
    {
        let workers = self.options.workers.max(1);
        let start = Instant::now();
        info!(workers, "starting reconstruction");

        let (tx, rx) = bounded::<WorkItem>(workers);
        let mut report = thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|id| {
                    let rx = rx.clone();
                    s.spawn(move || self.worker_loop(id, rx, fetcher))
                })
                .collect();
            drop(rx);

            for item in items {
                if self.stopping() {
                    break;
                }
                // Fails only when every worker has already quit.
                if tx.send(item).is_err() {
                    break;
                }
            }
            drop(tx);

            let mut report = RestoreReport::default();
            for handle in handles {
                match handle.join() {
                    Ok(stats) => report.absorb(stats),
                    Err(_) => error!("a worker thread panicked"),
                }
            }
            report
        });

        report.interrupted = self.stopping();
        info!(
            processed = report.processed,
            fetched = report.fetched,
            present = report.already_present,
            unresolved = report.unresolved.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "reconstruction finished"
        );
        report
    }

    fn worker_loop<F: Fetcher + ?Sized>(&self, id: usize, rx: Receiver<WorkItem>, fetcher: &F) -> RestoreReport {
        let mut stats = RestoreReport::default();
        for item in rx.iter() {
            if self.stopping() {
                debug!(worker = id, "shutdown requested, leaving queue");
                break;
            }
            stats.processed += 1;
            let as_link = item.link_target.is_some() && self.options.link_policy == LinkPolicy::Recreate;
            if let Some(path) = escapes_root(&item, as_link) {
                warn!(path = %path.display(), "destination leaves the restore root, skipping");
                stats.unresolved.push(path);
                continue;
            }
            match (&item.link_target, self.options.link_policy) {
                (Some(target), LinkPolicy::Recreate) => self.restore_link(&item, target, &mut stats),
                _ => self.restore_file(&item, fetcher, &mut stats),
            }
        }
        stats
    }

    fn restore_file<F: Fetcher + ?Sized>(&self, item: &WorkItem, fetcher: &F, stats: &mut RestoreReport) {
        let dir = item.dest_dir();
        let path = dir.join(&item.name);
        if let Err(err) = ensure_dir(&dir) {
            warn!(error = %err, "skipping item");
            stats.unresolved.push(path);
            return;
        }

        if path.is_file() {
            debug!(path = %path.display(), "already have");
            stats.already_present += 1;
        } else {
            match self.fetch_with_retry(item, &dir, fetcher) {
                Ok(()) => stats.fetched += 1,
                Err(err) => warn!(error = %err, "giving up on item"),
            }
            self.pause();
            if !path.is_file() {
                stats.unresolved.push(path);
                return;
            }
        }

        self.apply_permissions(item, &path, stats);
    }

    fn fetch_with_retry<F: Fetcher + ?Sized>(&self, item: &WorkItem, dir: &Path, fetcher: &F) -> Result<(), FetchError> {
        let url = item.url();
        match fetcher.fetch(&url, dir) {
            Ok(()) => Ok(()),
            Err(err @ FetchError::Cancelled { .. }) => Err(err),
            Err(err) if self.stopping() => Err(err),
            Err(err) => {
                warn!(url = %url, error = %err, "fetch failed, retrying once");
                fetcher.fetch(&url, dir)
            }
        }
    }

    fn apply_permissions(&self, item: &WorkItem, path: &Path, stats: &mut RestoreReport) {
        let mut ok = true;
        // Ownership first: chown may clear mode bits on some systems.
        let steps = [
            fsx::set_owner(path, item.uid, item.gid),
            fsx::set_unix_permissions(path, item.mode & PERMISSION_MASK),
        ];
        for result in steps {
            if let Err(source) = result {
                let err = ItemError::Permission { path: path.to_path_buf(), source };
                warn!(error = %err, "permission restore failed");
                ok = false;
            }
        }
        if ok {
            stats.permissions_applied += 1;
        } else {
            stats.permission_failures += 1;
        }
    }

    fn restore_link(&self, item: &WorkItem, target: &str, stats: &mut RestoreReport) {
        let dir = item.dest_dir();
        let path = dir.join(&item.name);
        if let Err(err) = ensure_dir(&dir) {
            warn!(error = %err, "skipping link");
            stats.unresolved.push(path);
            return;
        }

        if fsx::symlink_metadata(&path).is_ok() {
            debug!(path = %path.display(), "link already present");
            stats.already_present += 1;
        } else if let Err(source) = fsx::make_symlink(target, &path) {
            let err = ItemError::Link { path: path.clone(), source };
            warn!(error = %err, "skipping link");
            stats.unresolved.push(path);
            return;
        } else {
            stats.links_created += 1;
        }

        match fsx::set_link_owner(&path, item.uid, item.gid) {
            Ok(()) => stats.permissions_applied += 1,
            Err(source) => {
                let err = ItemError::Permission { path, source };
                warn!(error = %err, "link ownership restore failed");
                stats.permission_failures += 1;
            }
        }
    }

    /// Sleeps for the configured pause, waking early on shutdown.
    fn pause(&self) {
        let deadline = Instant::now() + self.options.pause;
        loop {
            let now = Instant::now();
            if now >= deadline || self.stopping() {
                return;
            }
            thread::sleep(PAUSE_SLICE.min(deadline - now));
        }
    }
}

/// Returns the destination when it would resolve outside the root: a `.`
/// or `..` segment, an existing ancestor below the root that is a symlink,
/// or, unless the item is restored as a link, a destination that is
/// already a symlink.
fn escapes_root(item: &WorkItem, as_link: bool) -> Option<PathBuf> {
    let path = item.dest_path();
    if !item.stays_inside_root() {
        return Some(path);
    }
    let mut current = item.target.dest_root.clone();
    for segment in &item.prefix {
        current.push(segment);
        match fsx::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => return Some(path),
            Ok(_) => {}
            // Not created yet, so nothing below it exists either.
            Err(_) => return None,
        }
    }
    match fsx::symlink_metadata(&path) {
        Ok(meta) if meta.file_type().is_symlink() && !as_link => Some(path),
        _ => None,
    }
}

fn ensure_dir(dir: &Path) -> Result<(), ItemError> {
    fsx::create_dir_all(dir).map_err(|source| ItemError::CreateDir { path: dir.to_path_buf(), source })
}
