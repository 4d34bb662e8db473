//! Node storage for the in-memory tree.
//!
//! Nodes live in an id-keyed arena owned by [`Vfs`](super::tree::Vfs);
//! `parent` is a plain id, never a second owner, so subtree teardown is a
//! map drain rather than a reference-count dance.

use std::collections::HashMap;
use std::time::SystemTime;

/// Arena key for one node. Ids are never reused within a tree's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directory payload (children by name) or file payload (bytes).
///
/// `size` is the logical length of the file. The cache may truncate
/// `content` to reclaim memory, so `content.len() < size` means the body
/// is not resident and has to be refetched from the origin.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Directory { children: HashMap<String, NodeId> },
    File { content: Vec<u8>, size: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Directory => write!(f, "Directory"),
            EntryKind::File => write!(f, "File"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// Canonical absolute path, `/`-separated, no `.`/`..`/doubled slashes.
    pub path: String,
    /// Permission bits, `0o000..=0o777`.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub modified: SystemTime,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
}

impl Node {
    pub fn directory(name: String, path: String, mode: u32, uid: u32, gid: u32, parent: Option<NodeId>) -> Self {
        Self {
            name,
            path,
            mode,
            uid,
            gid,
            modified: SystemTime::now(),
            parent,
            kind: NodeKind::Directory { children: HashMap::new() },
        }
    }

    pub fn file(name: String, path: String, mode: u32, uid: u32, gid: u32, parent: NodeId, content: Vec<u8>) -> Self {
        let size = content.len() as u64;
        Self {
            name,
            path,
            mode,
            uid,
            gid,
            modified: SystemTime::now(),
            parent: Some(parent),
            kind: NodeKind::File { content, size },
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn entry_kind(&self) -> EntryKind {
        match self.kind {
            NodeKind::Directory { .. } => EntryKind::Directory,
            NodeKind::File { .. } => EntryKind::File,
        }
    }

    pub fn children(&self) -> Option<&HashMap<String, NodeId>> {
        match &self.kind {
            NodeKind::Directory { children } => Some(children),
            NodeKind::File { .. } => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut HashMap<String, NodeId>> {
        match &mut self.kind {
            NodeKind::Directory { children } => Some(children),
            NodeKind::File { .. } => None,
        }
    }

    /// Logical size. Directories report 0.
    pub fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::Directory { .. } => 0,
            NodeKind::File { size, .. } => *size,
        }
    }

    /// Bytes currently held in memory for this file.
    pub fn resident_len(&self) -> u64 {
        match &self.kind {
            NodeKind::Directory { .. } => 0,
            NodeKind::File { content, .. } => content.len() as u64,
        }
    }

    /// True when this file's body has been evicted and only the logical
    /// size survives.
    pub fn is_evicted(&self) -> bool {
        match &self.kind {
            NodeKind::Directory { .. } => false,
            NodeKind::File { content, size } => (content.len() as u64) < *size,
        }
    }

    /// `drwx------`-style mode string. Group bits are carried and shown
    /// even though authorization only ever consults owner and other.
    pub fn mode_string(&self) -> String {
        mode_string(self.entry_kind(), self.mode)
    }
}

/// Render `drwxr-x---`-style text for a kind and mode.
pub fn mode_string(kind: EntryKind, mode: u32) -> String {
    let mut out = String::with_capacity(10);
    out.push(match kind {
        EntryKind::Directory => 'd',
        EntryKind::File => '-',
    });
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}
