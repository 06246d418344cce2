//! Thin filesystem wrapper.
//!
//! Capture and restore only ever touch ownership, mode bits and link targets
//! through these helpers so that the call-sites stay free of `cfg` noise.
//! On non-unix targets ownership and mode are reported as zero and the
//! setters are no-ops.

use std::fs::Metadata;
use std::io;
use std::path::Path;

pub use std::fs::*;

/// The kind of an entry as seen without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
    Symlink,
}

/// Metadata captured for every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub size: u64,
    pub mtime: i64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub entry_type: EntryType,
}

impl EntryMeta {
    pub fn from_metadata(meta: &Metadata) -> Self {
        let file_type = meta.file_type();
        let entry_type = if file_type.is_symlink() {
            EntryType::Symlink
        } else if file_type.is_dir() {
            EntryType::Directory
        } else {
            EntryType::File
        };
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Self {
                size: meta.size(),
                mtime: meta.mtime(),
                mode: meta.mode(),
                uid: meta.uid(),
                gid: meta.gid(),
                entry_type,
            }
        }
        #[cfg(not(unix))]
        {
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs() as i64);
            Self { size: meta.len(), mtime, mode: 0, uid: 0, gid: 0, entry_type }
        }
    }
}

#[cfg(unix)]
/// Set POSIX permission bits on Unix.
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(unix)]
/// Change owner and group, following symlinks.
pub fn set_owner(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
}

#[cfg(unix)]
/// Change owner and group of the link itself.
pub fn set_link_owner(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    std::os::unix::fs::lchown(path, Some(uid), Some(gid))
}

#[cfg(unix)]
pub fn make_symlink(target: &str, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
pub fn set_unix_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
pub fn set_owner(_path: &Path, _uid: u32, _gid: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
pub fn set_link_owner(_path: &Path, _uid: u32, _gid: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
pub fn make_symlink(_target: &str, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symbolic links are not supported on this platform"))
}
