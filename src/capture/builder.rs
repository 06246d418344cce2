//! Assembles a nested tree from a flat, pre-order stream of walk events.
//!
//! The builder keeps one open frame per directory on the active path. A new
//! event first closes every frame the walk has left (innermost first, each
//! closed frame becoming a directory node of its parent), then opens a frame
//! for itself and fills it with the non-directory entries it lists.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use super::probe::MetadataProbe;
use super::walk::WalkEvent;
use crate::common::{Node, NodeKind, Snapshot};
use crate::error::{Result, SnapshotError};
use crate::fsx::{EntryMeta, EntryType};

/// Outcome of feeding one event to the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Opened,
    /// The directory is excluded or vanished; its subtree must not be walked.
    Pruned,
}

struct OpenDir {
    /// `None` only for the root frame.
    header: Option<Node>,
    children: Vec<Node>,
}

pub struct TreeBuilder<P> {
    base: PathBuf,
    probe: P,
    excludes: HashSet<Vec<String>>,
    stack: Vec<OpenDir>,
    previous: Vec<String>,
    total_size: u64,
}

impl<P: MetadataProbe> TreeBuilder<P> {
    pub fn new<I>(base: impl Into<PathBuf>, probe: P, excludes: I) -> Self
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        Self {
            base: base.into(),
            probe,
            excludes: excludes.into_iter().collect(),
            stack: vec![OpenDir { header: None, children: Vec::new() }],
            previous: Vec::new(),
            total_size: 0,
        }
    }

    /// Aggregate size of every node built so far.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn visit(&mut self, event: &WalkEvent) -> Result<Visit> {
        let segments = relative_segments(&self.base, &event.dir)?;
        if self.excludes.contains(&segments) {
            debug!(path = %event.dir.display(), "excluded");
            return Ok(Visit::Pruned);
        }

        let depth = shared_depth(&segments, &self.previous);
        // The parent of this directory must be one of the open frames.
        if segments.len() != depth + 1 && !(segments.is_empty() && self.previous.is_empty()) {
            return Err(SnapshotError::OutOfOrder { path: event.dir.clone() });
        }

        let header = match segments.last() {
            None => None,
            Some(name) => match self.probe.stat(&event.dir) {
                Ok(meta) => Some(self.make_node(name.clone(), &meta, NodeKind::Directory(Vec::new()))),
                Err(err) => {
                    warn!(path = %event.dir.display(), error = %err, "directory vanished, skipping");
                    return Ok(Visit::Pruned);
                }
            },
        };

        for _ in depth..self.previous.len() {
            self.close_top();
        }
        if header.is_some() {
            self.stack.push(OpenDir { header, children: Vec::new() });
        }
        debug_assert_eq!(self.stack.len(), segments.len() + 1);

        for name in event.files.iter().chain(&event.dirs) {
            if let Some(node) = self.probe_entry(&event.dir, name) {
                if let Some(top) = self.stack.last_mut() {
                    top.children.push(node);
                }
            }
        }

        self.previous = segments;
        Ok(Visit::Opened)
    }

    /// Closes every open directory and returns the finished snapshot.
    pub fn finish(mut self) -> Snapshot {
        while self.stack.len() > 1 {
            self.close_top();
        }
        let root = self.stack.pop().map(|frame| frame.children).unwrap_or_default();
        Snapshot::new(root, self.total_size)
    }

    fn probe_entry(&mut self, dir: &Path, name: &str) -> Option<Node> {
        let path = dir.join(name);
        let meta = match self.probe.lstat(&path) {
            Ok(meta) => meta,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "entry vanished, skipping");
                return None;
            }
        };
        let kind = match meta.entry_type {
            // Visited later as its own event.
            EntryType::Directory => return None,
            EntryType::File => NodeKind::File,
            EntryType::Symlink => match self.probe.read_link(&path) {
                Ok(target) => NodeKind::Symlink(target.to_string_lossy().into_owned()),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "unreadable link, skipping");
                    return None;
                }
            },
        };
        Some(self.make_node(name.to_string(), &meta, kind))
    }

    fn make_node(&mut self, name: String, meta: &EntryMeta, kind: NodeKind) -> Node {
        self.total_size += meta.size;
        Node { name, size: meta.size, mtime: meta.mtime, mode: meta.mode, uid: meta.uid, gid: meta.gid, kind }
    }

    fn close_top(&mut self) {
        let Some(frame) = self.stack.pop() else { return };
        let Some(mut node) = frame.header else { return };
        node.kind = NodeKind::Directory(frame.children);
        if let Some(parent) = self.stack.last_mut() {
            parent.children.push(node);
        }
    }
}

fn relative_segments(base: &Path, dir: &Path) -> Result<Vec<String>> {
    let rel = dir.strip_prefix(base).map_err(|_| SnapshotError::StripPrefix {
        prefix: base.to_path_buf(),
        path: dir.to_path_buf(),
    })?;
    Ok(rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect())
}

fn shared_depth(a: &[String], b: &[String]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;

    /// In-memory filesystem keyed by absolute path.
    #[derive(Default)]
    struct FakeFs {
        entries: HashMap<PathBuf, (EntryMeta, Option<String>)>,
    }

    impl FakeFs {
        fn add(&mut self, path: &str, entry_type: EntryType, size: u64) {
            let meta = EntryMeta { size, mtime: 7, mode: 0o644, uid: 0, gid: 0, entry_type };
            self.entries.insert(PathBuf::from(path), (meta, None));
        }

        fn link(&mut self, path: &str, target: &str) {
            let meta = EntryMeta { size: target.len() as u64, mtime: 7, mode: 0o777, uid: 0, gid: 0, entry_type: EntryType::Symlink };
            self.entries.insert(PathBuf::from(path), (meta, Some(target.to_string())));
        }

        fn get(&self, path: &Path) -> io::Result<&(EntryMeta, Option<String>)> {
            self.entries.get(path).ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }
    }

    impl MetadataProbe for &FakeFs {
        fn stat(&self, path: &Path) -> io::Result<EntryMeta> {
            self.lstat(path)
        }

        fn lstat(&self, path: &Path) -> io::Result<EntryMeta> {
            self.get(path).map(|(meta, _)| *meta)
        }

        fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
            match self.get(path)? {
                (_, Some(target)) => Ok(PathBuf::from(target)),
                _ => Err(io::Error::from(io::ErrorKind::InvalidInput)),
            }
        }
    }

    fn names(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    fn child<'a>(nodes: &'a [Node], name: &str) -> &'a Node {
        nodes.iter().find(|n| n.name == name).unwrap()
    }

    #[test]
    fn sibling_directories_share_parent() {
        let mut fs = FakeFs::default();
        fs.add("/r/a", EntryType::Directory, 0);
        fs.add("/r/a/b", EntryType::Directory, 0);
        fs.add("/r/a/c", EntryType::Directory, 0);
        fs.add("/r/a/b/file1", EntryType::File, 10);
        fs.add("/r/a/c/file2", EntryType::File, 20);

        let mut builder = TreeBuilder::new("/r", &fs, Vec::new());
        for event in [
            WalkEvent::new("/r", &["a"], &[]),
            WalkEvent::new("/r/a", &["b", "c"], &[]),
            WalkEvent::new("/r/a/b", &[], &["file1"]),
            WalkEvent::new("/r/a/c", &[], &["file2"]),
        ] {
            assert_eq!(builder.visit(&event).unwrap(), Visit::Opened);
        }
        let snapshot = builder.finish();

        assert_eq!(names(&snapshot.fsroot), vec!["a"]);
        let a = snapshot.fsroot[0].children().unwrap();
        assert_eq!(names(a), vec!["b", "c"]);
        assert_eq!(names(child(a, "b").children().unwrap()), vec!["file1"]);
        assert_eq!(names(child(a, "c").children().unwrap()), vec!["file2"]);
        assert_eq!(snapshot.size, 30);
    }

    #[test]
    fn backtracks_several_levels() {
        let mut fs = FakeFs::default();
        for dir in ["/r/a", "/r/a/b", "/r/a/b/c", "/r/z"] {
            fs.add(dir, EntryType::Directory, 0);
        }
        fs.add("/r/z/f", EntryType::File, 1);

        let mut builder = TreeBuilder::new("/r", &fs, Vec::new());
        builder.visit(&WalkEvent::new("/r", &["a", "z"], &[])).unwrap();
        builder.visit(&WalkEvent::new("/r/a", &["b"], &[])).unwrap();
        builder.visit(&WalkEvent::new("/r/a/b", &["c"], &[])).unwrap();
        builder.visit(&WalkEvent::new("/r/a/b/c", &[], &[])).unwrap();
        builder.visit(&WalkEvent::new("/r/z", &[], &["f"])).unwrap();
        let snapshot = builder.finish();

        assert_eq!(names(&snapshot.fsroot), vec!["a", "z"]);
        let c = &snapshot.fsroot[0].children().unwrap()[0].children().unwrap()[0];
        assert_eq!(c.name, "c");
        assert_eq!(c.children(), Some(&[][..]));
        assert_eq!(names(child(&snapshot.fsroot, "z").children().unwrap()), vec!["f"]);
    }

    #[test]
    fn excluded_directory_is_pruned() {
        let mut fs = FakeFs::default();
        fs.add("/r/var", EntryType::Directory, 4096);
        fs.add("/r/etc", EntryType::Directory, 0);
        fs.add("/r/etc/hosts", EntryType::File, 5);

        let mut builder = TreeBuilder::new("/r", &fs, vec![vec!["var".to_string()]]);
        builder.visit(&WalkEvent::new("/r", &["etc", "var"], &[])).unwrap();
        builder.visit(&WalkEvent::new("/r/etc", &[], &["hosts"])).unwrap();
        assert_eq!(builder.visit(&WalkEvent::new("/r/var", &[], &[])).unwrap(), Visit::Pruned);
        let snapshot = builder.finish();

        assert_eq!(names(&snapshot.fsroot), vec!["etc"]);
        assert_eq!(snapshot.size, 5);
    }

    #[test]
    fn links_are_recorded_not_expanded() {
        let mut fs = FakeFs::default();
        fs.add("/r/data", EntryType::Directory, 0);
        fs.link("/r/current", "data");

        let mut builder = TreeBuilder::new("/r", &fs, Vec::new());
        builder.visit(&WalkEvent::new("/r", &["data"], &["current"])).unwrap();
        builder.visit(&WalkEvent::new("/r/data", &[], &[])).unwrap();
        let snapshot = builder.finish();

        let link = child(&snapshot.fsroot, "current");
        assert_eq!(link.link_target(), Some("data"));
        assert!(child(&snapshot.fsroot, "data").is_dir());
    }

    #[test]
    fn files_precede_directories() {
        let mut fs = FakeFs::default();
        fs.add("/r/d", EntryType::Directory, 0);
        fs.add("/r/f", EntryType::File, 1);

        let mut builder = TreeBuilder::new("/r", &fs, Vec::new());
        builder.visit(&WalkEvent::new("/r", &["d"], &["f"])).unwrap();
        builder.visit(&WalkEvent::new("/r/d", &[], &[])).unwrap();
        assert_eq!(names(&builder.finish().fsroot), vec!["f", "d"]);
    }

    #[test]
    fn vanished_entries_are_skipped() {
        let mut fs = FakeFs::default();
        fs.add("/r/kept", EntryType::File, 2);

        let mut builder = TreeBuilder::new("/r", &fs, Vec::new());
        builder.visit(&WalkEvent::new("/r", &["gone_dir"], &["kept", "gone"])).unwrap();
        assert_eq!(builder.visit(&WalkEvent::new("/r/gone_dir", &[], &["x"])).unwrap(), Visit::Pruned);
        let snapshot = builder.finish();
        assert_eq!(names(&snapshot.fsroot), vec!["kept"]);
    }

    #[test]
    fn skipped_level_is_rejected() {
        let fs = FakeFs::default();
        let mut builder = TreeBuilder::new("/r", &fs, Vec::new());
        builder.visit(&WalkEvent::new("/r", &[], &[])).unwrap();
        let err = builder.visit(&WalkEvent::new("/r/a/b", &[], &[])).unwrap_err();
        assert!(matches!(err, SnapshotError::OutOfOrder { .. }));

        let err = builder.visit(&WalkEvent::new("/elsewhere", &[], &[])).unwrap_err();
        assert!(matches!(err, SnapshotError::StripPrefix { .. }));
    }

    #[test]
    fn stack_tracks_active_path() {
        let mut fs = FakeFs::default();
        fs.add("/r/a", EntryType::Directory, 0);
        fs.add("/r/a/b", EntryType::Directory, 0);
        fs.add("/r/c", EntryType::Directory, 0);

        let mut builder = TreeBuilder::new("/r", &fs, Vec::new());
        builder.visit(&WalkEvent::new("/r", &["a", "c"], &[])).unwrap();
        assert_eq!(builder.stack.len(), 1);
        builder.visit(&WalkEvent::new("/r/a", &["b"], &[])).unwrap();
        builder.visit(&WalkEvent::new("/r/a/b", &[], &[])).unwrap();
        assert_eq!(builder.stack.len(), 3);
        builder.visit(&WalkEvent::new("/r/c", &[], &[])).unwrap();
        assert_eq!(builder.stack.len(), 2);
    }
}
