//! # Node Codec
//!
//! Every node is stored as a positional array so that large trees stay small
//! on the wire:
//!
//! ```text
//! [name, size, mtime, mode, uid, gid]            plain file
//! [name, size, mtime, mode, uid, gid, [..]]      directory (nested records)
//! [name, size, mtime, mode, uid, gid, "target"]  symbolic link
//! ```
//!
//! The payload slot is dropped entirely for files instead of being written as
//! `null`. On decode the payload's JSON type alone decides between directory
//! and link. Records trimmed further than six slots are still accepted as
//! files, with `mode` falling back to [`DEFAULT_MODE`] and `uid`/`gid` to 0.
//!
//! The snapshot document wraps the root records:
//! `{"fsroot": [..], "version": 2, "size": <total>}`. The version is checked
//! before any node is decoded.

use std::fmt;
use std::io::{Read, Write};

use serde::de::{self, IgnoredAny, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::common::{Node, NodeKind, Snapshot, DEFAULT_MODE, FORMAT_VERSION};
use crate::error::{Result, SnapshotError};

/// Fields that precede the payload slot.
const FIXED_FIELDS: usize = 6;

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let len = match self.kind {
            NodeKind::File => FIXED_FIELDS,
            NodeKind::Directory(_) | NodeKind::Symlink(_) => FIXED_FIELDS + 1,
        };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.name)?;
        seq.serialize_element(&self.size)?;
        seq.serialize_element(&self.mtime)?;
        seq.serialize_element(&self.mode)?;
        seq.serialize_element(&self.uid)?;
        seq.serialize_element(&self.gid)?;
        match &self.kind {
            NodeKind::File => {}
            NodeKind::Directory(children) => seq.serialize_element(children)?,
            NodeKind::Symlink(target) => seq.serialize_element(target)?,
        }
        seq.end()
    }
}

/// The seventh slot, told apart by its JSON type.
///
/// Dispatched on the token itself rather than through an untagged enum, so
/// a directory's children are decoded in place instead of being buffered.
enum Payload {
    Children(Vec<Node>),
    Target(String),
}

struct PayloadVisitor;

impl<'de> Visitor<'de> for PayloadVisitor {
    type Value = Payload;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a list of child records or a link target string")
    }

    fn visit_str<E: de::Error>(self, target: &str) -> std::result::Result<Payload, E> {
        Ok(Payload::Target(target.to_string()))
    }

    fn visit_string<E: de::Error>(self, target: String) -> std::result::Result<Payload, E> {
        Ok(Payload::Target(target))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Payload, A::Error> {
        let mut children = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(child) = seq.next_element::<Node>()? {
            children.push(child);
        }
        Ok(Payload::Children(children))
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Payload, D::Error> {
        deserializer.deserialize_any(PayloadVisitor)
    }
}

struct NodeVisitor;

impl<'de> Visitor<'de> for NodeVisitor {
    type Value = Node;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a node record [name, size, mtime, mode, uid, gid, payload?]")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Node, A::Error> {
        let name: String = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        if !is_plain_segment(&name) {
            return Err(de::Error::invalid_value(de::Unexpected::Str(&name), &"a single path segment"));
        }
        let size: u64 = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        let mtime: i64 = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(2, &self))?;
        let mode: u32 = seq.next_element()?.unwrap_or(DEFAULT_MODE);
        let uid: u32 = seq.next_element()?.unwrap_or(0);
        let gid: u32 = seq.next_element()?.unwrap_or(0);
        let kind = match seq.next_element::<Payload>()? {
            None => NodeKind::File,
            Some(Payload::Children(children)) => NodeKind::Directory(children),
            Some(Payload::Target(target)) => NodeKind::Symlink(target),
        };
        if seq.next_element::<IgnoredAny>()?.is_some() {
            return Err(de::Error::invalid_length(FIXED_FIELDS + 2, &self));
        }
        Ok(Node { name, size, mtime, mode, uid, gid, kind })
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Node, D::Error> {
        deserializer.deserialize_seq(NodeVisitor)
    }
}

/// A name must be exactly one real path component.
fn is_plain_segment(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\0')
}

/// Encodes a single node to its positional JSON form.
pub fn encode_node(node: &Node) -> Result<Value> {
    Ok(serde_json::to_value(node)?)
}

/// Decodes a single positional record.
///
/// Fails when the record is not an array, is shorter than three slots, is
/// longer than seven, or carries a payload that is neither a list of
/// records nor a string.
pub fn decode_node(value: &Value) -> Result<Node> {
    Ok(Node::deserialize(value)?)
}

/// Writes the snapshot document without any whitespace.
pub fn write_snapshot<W: Write>(writer: W, snapshot: &Snapshot) -> Result<()> {
    serde_json::to_writer(writer, snapshot)?;
    Ok(())
}

/// Reads a snapshot document, rejecting unsupported versions before the
/// tree is decoded.
pub fn read_snapshot<R: Read>(mut reader: R) -> Result<Snapshot> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).map_err(serde_json::Error::io)?;
    decode_snapshot(&bytes)
}

/// Parses a snapshot from an in-memory buffer.
///
/// Tree depth is bounded only by the input: nesting is not capped by the
/// parser, and the stack grows on demand while records are decoded.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot> {
    let header: Header = from_slice_unbounded(bytes)?;
    check_version(&header)?;
    from_slice_unbounded(bytes)
}

/// Only the version; the tree is skipped without being built.
#[derive(Deserialize)]
struct Header {
    #[serde(default)]
    version: Option<Value>,
}

fn from_slice_unbounded<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    de.disable_recursion_limit();
    let value = T::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(value)
}

fn check_version(header: &Header) -> Result<()> {
    let found = header.version.as_ref().and_then(Value::as_u64);
    if found != Some(u64::from(FORMAT_VERSION)) {
        return Err(SnapshotError::FormatVersion { found, expected: FORMAT_VERSION });
    }
    Ok(())
}
