//! Shared data model for capture and reconstruction.

/// Snapshot format version written by capture and accepted by restore.
pub const FORMAT_VERSION: u32 = 2;

/// Mode assumed for a file record that was trimmed before its mode slot.
pub const DEFAULT_MODE: u32 = 0o644;

/// Permission bits applied on restore: owner/group/other rwx only.
pub const PERMISSION_MASK: u32 = 0o777;

/// One captured filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Single path segment, never contains a separator.
    pub name: String,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub mtime: i64,
    /// Raw type + permission bits as reported by the filesystem.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub kind: NodeKind,
}

/// What an entry is, and the payload that goes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory(Vec<Node>),
    /// Link target exactly as stored on disk. Never followed.
    Symlink(String),
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    pub fn children(&self) -> Option<&[Node]> {
        match &self.kind {
            NodeKind::Directory(children) => Some(children),
            _ => None,
        }
    }

    pub fn link_target(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Symlink(target) => Some(target),
            _ => None,
        }
    }
}

/// The full serializable capture: root entries, format version and
/// the aggregate size of every captured node.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    pub fsroot: Vec<Node>,
    pub version: u32,
    pub size: u64,
}

/// Totals folded over a snapshot tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub files: u64,
    pub directories: u64,
    pub links: u64,
    pub bytes: u64,
}

impl Snapshot {
    pub fn new(fsroot: Vec<Node>, size: u64) -> Self {
        Self { fsroot, version: FORMAT_VERSION, size }
    }

    /// Visits every node in pre-order together with its parent segments.
    pub fn visit<F>(&self, mut f: F)
    where
        F: FnMut(&[&str], &Node),
    {
        fn walk<'a, F: FnMut(&[&str], &Node)>(nodes: &'a [Node], prefix: &mut Vec<&'a str>, f: &mut F) {
            for node in nodes {
                f(prefix, node);
                if let NodeKind::Directory(children) = &node.kind {
                    prefix.push(&node.name);
                    walk(children, prefix, f);
                    prefix.pop();
                }
            }
        }
        let mut prefix = Vec::new();
        walk(&self.fsroot, &mut prefix, &mut f);
    }

    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats::default();
        self.visit(|_, node| {
            stats.bytes += node.size;
            match node.kind {
                NodeKind::File => stats.files += 1,
                NodeKind::Directory(_) => stats.directories += 1,
                NodeKind::Symlink(_) => stats.links += 1,
            }
        });
        stats
    }
}
