use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::FetchError;

/// Downloads a single URL into a local directory, keeping the URL's file name.
pub trait Fetcher: Sync {
    fn fetch(&self, url: &str, dest_dir: &Path) -> Result<(), FetchError>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs an external downloader (`wget` by default) as
/// `<program> -q -nc <url> -P <dest_dir>`.
///
/// The child is polled so that a raised shutdown flag kills an in-flight
/// transfer instead of waiting for it to finish.
pub struct CommandFetcher {
    program: String,
    shutdown: Arc<AtomicBool>,
}

impl CommandFetcher {
    pub fn new(program: impl Into<String>, shutdown: Arc<AtomicBool>) -> Self {
        Self { program: program.into(), shutdown }
    }
}

impl Fetcher for CommandFetcher {
    fn fetch(&self, url: &str, dest_dir: &Path) -> Result<(), FetchError> {
        debug!(url, dir = %dest_dir.display(), "fetching");
        let mut child = Command::new(&self.program)
            .arg("-q")
            .arg("-nc")
            .arg(url)
            .arg("-P")
            .arg(dest_dir)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| FetchError::Spawn { program: self.program.clone(), source })?;

        loop {
            let status = child
                .try_wait()
                .map_err(|source| FetchError::Spawn { program: self.program.clone(), source })?;
            if let Some(status) = status {
                if status.success() {
                    return Ok(());
                }
                return Err(FetchError::Status { url: url.to_string(), code: status.code() });
            }
            if self.shutdown.load(Ordering::SeqCst) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(FetchError::Cancelled { url: url.to_string() });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}
