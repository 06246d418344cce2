//! Flattens a snapshot tree into per-file work items.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::common::{Node, NodeKind};

/// Where files are fetched from and where they land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreTarget {
    pub dest_root: PathBuf,
    /// Base URL; a trailing slash is optional.
    pub origin: String,
}

/// One file or link to materialize.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub target: Arc<RestoreTarget>,
    /// Parent directory segments below the destination root.
    pub prefix: Vec<String>,
    pub name: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Set for symbolic links.
    pub link_target: Option<String>,
}

impl WorkItem {
    pub fn dest_dir(&self) -> PathBuf {
        let mut dir = self.target.dest_root.clone();
        dir.extend(&self.prefix);
        dir
    }

    pub fn dest_path(&self) -> PathBuf {
        self.dest_dir().join(&self.name)
    }

    /// `origin + prefix + name`, with each prefix segment followed by `/`.
    ///
    /// Segments are percent-encoded; the origin is used as given.
    pub fn url(&self) -> String {
        let mut url = self.target.origin.trim_end_matches('/').to_string();
        url.push('/');
        for segment in &self.prefix {
            url.push_str(&urlencoding::encode(segment));
            url.push('/');
        }
        url.push_str(&urlencoding::encode(&self.name));
        url
    }

    /// True when every segment is a single normal path component, so that
    /// `dest_path()` is lexically below the destination root.
    pub fn stays_inside_root(&self) -> bool {
        self.prefix.iter().chain(std::iter::once(&self.name)).all(|s| is_normal_segment(s))
    }
}

fn is_normal_segment(segment: &str) -> bool {
    let mut components = Path::new(segment).components();
    matches!((components.next(), components.next()), (Some(Component::Normal(_)), None)) && !segment.contains('/')
}

/// Lazy depth-first iterator over the leaves of a tree.
pub struct Flatten<'a> {
    target: Arc<RestoreTarget>,
    stack: Vec<std::slice::Iter<'a, Node>>,
    prefix: Vec<String>,
}

impl<'a> Flatten<'a> {
    pub fn new(roots: &'a [Node], target: Arc<RestoreTarget>) -> Self {
        Self { target, stack: vec![roots.iter()], prefix: Vec::new() }
    }
}

impl<'a> Iterator for Flatten<'a> {
    type Item = WorkItem;

    fn next(&mut self) -> Option<WorkItem> {
        loop {
            let level = self.stack.last_mut()?;
            let Some(node) = level.next() else {
                self.stack.pop();
                self.prefix.pop();
                continue;
            };
            let link_target = match &node.kind {
                NodeKind::Directory(children) => {
                    self.prefix.push(node.name.clone());
                    self.stack.push(children.iter());
                    continue;
                }
                NodeKind::File => None,
                NodeKind::Symlink(target) => Some(target.clone()),
            };
            return Some(WorkItem {
                target: Arc::clone(&self.target),
                prefix: self.prefix.clone(),
                name: node.name.clone(),
                mode: node.mode,
                uid: node.uid,
                gid: node.gid,
                link_target,
            });
        }
    }
}

/// Flattens `roots` into work items for `target`.
pub fn flatten(roots: &[Node], target: RestoreTarget) -> Flatten<'_> {
    Flatten::new(roots, Arc::new(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn leaf(name: &str, kind: NodeKind) -> Node {
        Node { name: name.into(), size: 1, mtime: 0, mode: 0o100640, uid: 10, gid: 20, kind }
    }

    fn dir(name: &str, children: Vec<Node>) -> Node {
        leaf(name, NodeKind::Directory(children))
    }

    fn target() -> RestoreTarget {
        RestoreTarget { dest_root: PathBuf::from("/srv/fs"), origin: "https://example.org/arch/".into() }
    }

    #[test]
    fn leaves_get_full_prefix() {
        let tree = vec![
            leaf("vmlinuz", NodeKind::File),
            dir("etc", vec![leaf("hosts", NodeKind::File), dir("ssl", vec![leaf("cert.pem", NodeKind::File)])]),
            dir("empty", vec![]),
            leaf("lib", NodeKind::Symlink("usr/lib".into())),
        ];
        let items: Vec<WorkItem> = flatten(&tree, target()).collect();
        let urls: Vec<String> = items.iter().map(WorkItem::url).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.org/arch/vmlinuz",
                "https://example.org/arch/etc/hosts",
                "https://example.org/arch/etc/ssl/cert.pem",
                "https://example.org/arch/lib",
            ]
        );
        assert_eq!(items[2].dest_path(), Path::new("/srv/fs/etc/ssl/cert.pem"));
        assert_eq!(items[2].dest_dir(), Path::new("/srv/fs/etc/ssl"));
        assert_eq!(items[3].link_target.as_deref(), Some("usr/lib"));
        assert_eq!((items[1].mode, items[1].uid, items[1].gid), (0o100640, 10, 20));
    }

    #[test]
    fn directories_alone_produce_nothing() {
        let tree = vec![dir("a", vec![dir("b", vec![])])];
        assert_eq!(flatten(&tree, target()).count(), 0);
    }

    #[test]
    fn origin_without_trailing_slash() {
        let tree = vec![dir("bin", vec![leaf("sh", NodeKind::File)])];
        let target = RestoreTarget { dest_root: PathBuf::from("/x"), origin: "http://host/base".into() };
        let item = flatten(&tree, target).next().unwrap();
        assert_eq!(item.url(), "http://host/base/bin/sh");
    }

    #[test]
    fn is_lazy() {
        let tree = vec![leaf("a", NodeKind::File), leaf("b", NodeKind::File)];
        let mut it = flatten(&tree, target());
        assert_eq!(it.next().unwrap().name, "a");
        assert_eq!(it.next().unwrap().name, "b");
        assert!(it.next().is_none());
        assert!(it.next().is_none());
    }

    #[test]
    fn url_segments_are_percent_encoded() {
        let tree = vec![dir("my docs", vec![leaf("a#1?.txt", NodeKind::File), leaf("100%", NodeKind::File)])];
        let urls: Vec<String> = flatten(&tree, target()).map(|item| item.url()).collect();
        assert_eq!(
            urls,
            vec!["https://example.org/arch/my%20docs/a%231%3F.txt", "https://example.org/arch/my%20docs/100%25"]
        );
    }

    #[test]
    fn dot_segments_leave_the_root() {
        let tree = vec![
            dir("..", vec![leaf("victim", NodeKind::File)]),
            dir("etc", vec![leaf(".", NodeKind::File), leaf(".hidden", NodeKind::File)]),
        ];
        let inside: Vec<bool> = flatten(&tree, target()).map(|item| item.stays_inside_root()).collect();
        assert_eq!(inside, vec![false, false, true]);
    }
}
