//! Top-down directory walk.
//!
//! Yields one [`WalkEvent`] per directory, parents strictly before their
//! descendants, and never comes back to a subtree once it has moved on.
//! Subdirectories of the most recent event are only queued when the next
//! event is requested, so [`Walk::prune`] can still drop them.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Result, SnapshotError};

/// A single directory visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEvent {
    /// Path on disk of the visited directory.
    pub dir: PathBuf,
    /// Immediate subdirectories (real directories only, links excluded).
    pub dirs: Vec<String>,
    /// Every other immediate entry, symlinks to directories included.
    pub files: Vec<String>,
}

impl WalkEvent {
    pub fn new(dir: impl Into<PathBuf>, dirs: &[&str], files: &[&str]) -> Self {
        Self {
            dir: dir.into(),
            dirs: dirs.iter().map(|s| s.to_string()).collect(),
            files: files.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub struct Walk {
    pending: Vec<PathBuf>,
    descend: Vec<PathBuf>,
}

impl Walk {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { pending: vec![base.into()], descend: Vec::new() }
    }

    /// Drops the subdirectories of the last yielded event.
    pub fn prune(&mut self) {
        self.descend.clear();
    }
}

impl Iterator for Walk {
    type Item = Result<WalkEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        // Reversed so the first name in sort order is visited first.
        self.pending.extend(self.descend.drain(..).rev());
        let dir = self.pending.pop()?;
        let event = list_dir(&dir);
        if let Ok(event) = &event {
            self.descend = event.dirs.iter().map(|name| dir.join(name)).collect();
        }
        Some(event)
    }
}

fn list_dir(dir: &Path) -> Result<WalkEvent> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let listing = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name();
    for entry in listing {
        let entry = entry.map_err(|source| SnapshotError::Walk { path: dir.to_path_buf(), source })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().is_dir() {
            dirs.push(name);
        } else {
            files.push(name);
        }
    }
    Ok(WalkEvent { dir: dir.to_path_buf(), dirs, files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::create_dir_all(dir.path().join("a/c")).unwrap();
        fs::create_dir_all(dir.path().join("z")).unwrap();
        fs::write(dir.path().join("top.txt"), b"t").unwrap();
        fs::write(dir.path().join("a/b/file1"), b"1").unwrap();
        fs::write(dir.path().join("a/c/file2"), b"2").unwrap();
        dir
    }

    fn relative(base: &Path, event: &WalkEvent) -> String {
        event.dir.strip_prefix(base).unwrap().to_string_lossy().into_owned()
    }

    #[test]
    fn walk_is_pre_order() {
        let tree = sample_tree();
        let order: Vec<String> = Walk::new(tree.path())
            .map(|e| relative(tree.path(), &e.unwrap()))
            .collect();
        assert_eq!(order, vec!["", "a", "a/b", "a/c", "z"]);
    }

    #[test]
    fn event_splits_dirs_and_files() {
        let tree = sample_tree();
        let first = Walk::new(tree.path()).next().unwrap().unwrap();
        assert_eq!(first.dirs, vec!["a", "z"]);
        assert_eq!(first.files, vec!["top.txt"]);
    }

    #[test]
    fn prune_skips_subtree() {
        let tree = sample_tree();
        let mut walk = Walk::new(tree.path());
        let mut order = Vec::new();
        while let Some(event) = walk.next() {
            let event = event.unwrap();
            let rel = relative(tree.path(), &event);
            if rel == "a" {
                walk.prune();
            }
            order.push(rel);
        }
        assert_eq!(order, vec!["", "a", "z"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_is_listed_as_file() {
        let tree = sample_tree();
        std::os::unix::fs::symlink(tree.path().join("a"), tree.path().join("alias")).unwrap();
        let events: Vec<WalkEvent> = Walk::new(tree.path()).map(|e| e.unwrap()).collect();
        assert!(events[0].files.contains(&"alias".to_string()));
        assert!(events.iter().all(|e| !e.dir.ends_with("alias")));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let tree = sample_tree();
        let mut walk = Walk::new(tree.path().join("nope"));
        assert!(matches!(walk.next(), Some(Err(SnapshotError::Walk { .. }))));
        assert!(walk.next().is_none());
    }
}
