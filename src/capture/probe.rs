use std::io;
use std::path::{Path, PathBuf};

use crate::fsx::{self, EntryMeta};

/// Metadata lookups the tree builder needs from the filesystem.
pub trait MetadataProbe {
    /// Metadata of `path`, following symlinks.
    fn stat(&self, path: &Path) -> io::Result<EntryMeta>;
    /// Metadata of `path` itself, never following symlinks.
    fn lstat(&self, path: &Path) -> io::Result<EntryMeta>;
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;
}

/// The real local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl MetadataProbe for LocalFs {
    fn stat(&self, path: &Path) -> io::Result<EntryMeta> {
        fsx::metadata(path).map(|m| EntryMeta::from_metadata(&m))
    }

    fn lstat(&self, path: &Path) -> io::Result<EntryMeta> {
        fsx::symlink_metadata(path).map(|m| EntryMeta::from_metadata(&m))
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fsx::read_link(path)
    }
}
