//! The in-memory tree: arena node storage plus every structural operation.
//!
//! All nodes live in one `HashMap<NodeId, Node>` owned by [`Vfs`]. Links
//! between nodes are ids in both directions (children maps downward, an
//! optional parent id upward), so there is exactly one owner for every
//! node and unlinking a subtree is draining ids out of the map.
//!
//! Operations validate completely before they mutate. A call either
//! applies its whole effect or leaves the tree untouched.

use std::collections::HashMap;
use std::time::SystemTime;

use crate::error::{FsError, Result};
use crate::vfs::node::{self, EntryKind, Node, NodeId, NodeKind};
use crate::vfs::path;

/// Outcome of resolving a path that is allowed to have a missing leaf.
#[derive(Debug)]
pub enum Lookup {
    /// The whole path names an existing node.
    Found(NodeId),
    /// Every ancestor exists; the final segment does not.
    Missing { parent: NodeId, name: String },
}

/// Snapshot of one node's metadata, as reported by `stat`.
#[derive(Debug, Clone)]
pub struct Stat {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    /// Logical size; resident bytes may be fewer after eviction.
    pub size: u64,
    pub resident: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub modified: SystemTime,
}

impl Stat {
    pub fn mode_string(&self) -> String {
        node::mode_string(self.kind, self.mode)
    }
}

/// What a file copy created, with everything the replication layer
/// needs to describe it to peers.
#[derive(Debug, Clone)]
pub struct FileCopy {
    pub source: String,
    pub dest: String,
    pub mode: u32,
    pub size: u64,
}

/// Result of a recursive directory copy: directories in creation order,
/// then the individual file copies.
#[derive(Debug, Clone)]
pub struct DirCopy {
    pub source: String,
    pub dest: String,
    pub dirs: Vec<(String, u32)>,
    pub files: Vec<FileCopy>,
}

/// Result of a rename, keeping the copy manifest of the half that ran.
#[derive(Debug)]
pub enum Renamed {
    File { copy: FileCopy, removed: String },
    Dir { copy: DirCopy, removed: String },
}

pub struct Vfs {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next_id: u64,
}

impl Vfs {
    /// Empty tree holding only the root directory. The root is world
    /// accessible until a restore or an explicit chmod says otherwise.
    pub fn new() -> Self {
        let root = NodeId(1);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node::directory("/".to_string(), "/".to_string(), 0o777, 0, 0, None),
        );
        Self { nodes, root, next_id: 2 }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Borrow a node. Ids are minted by this tree and never reused, so a
    /// stale id is a bug, not a recoverable condition.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[&id]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes.get_mut(&id).expect("stale node id")
    }

    pub fn path_of(&self, id: NodeId) -> &str {
        &self.node(id).path
    }

    fn alloc(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    // ---- resolution ----

    /// Resolve `path` from `ctx` (or from the root when absolute),
    /// tolerating a missing final segment.
    pub fn lookup(&self, path: &str, ctx: NodeId) -> Result<Lookup> {
        let segs: Vec<&str> = path::segments(path).collect();
        let mut cur = if path::is_absolute(path) { self.root } else { ctx };
        for (i, seg) in segs.iter().enumerate() {
            let node = self.node(cur);
            if !node.is_dir() {
                return Err(FsError::NotADirectory(node.path.clone()));
            }
            if *seg == ".." {
                cur = node.parent.unwrap_or(cur);
                continue;
            }
            match node.children().and_then(|c| c.get(*seg)) {
                Some(&child) => cur = child,
                None if i + 1 == segs.len() => {
                    return Ok(Lookup::Missing { parent: cur, name: (*seg).to_string() });
                }
                None => return Err(FsError::NotFound(path.to_string())),
            }
        }
        Ok(Lookup::Found(cur))
    }

    /// Resolve to an existing node or fail with `NotFound`.
    pub fn resolve(&self, path: &str, ctx: NodeId) -> Result<NodeId> {
        match self.lookup(path, ctx)? {
            Lookup::Found(id) => Ok(id),
            Lookup::Missing { .. } => Err(FsError::NotFound(path.to_string())),
        }
    }

    /// Resolve to an existing directory, as `cd` needs.
    pub fn resolve_dir(&self, path: &str, ctx: NodeId) -> Result<NodeId> {
        let id = self.resolve(path, ctx)?;
        if self.node(id).is_dir() {
            Ok(id)
        } else {
            Err(FsError::NotADirectory(path.to_string()))
        }
    }

    /// Canonical absolute spelling of `path` as seen from `ctx`, whether
    /// or not anything exists there. `..` pops a segment and is a no-op
    /// at the root, matching what resolution does with real parent links.
    pub fn canonicalize(&self, path: &str, ctx: NodeId) -> String {
        let base = if path::is_absolute(path) { "/" } else { self.path_of(ctx) };
        let mut parts: Vec<&str> =
            if base == "/" { Vec::new() } else { base[1..].split('/').collect() };
        for seg in path::segments(path) {
            if seg == ".." {
                parts.pop();
            } else {
                parts.push(seg);
            }
        }
        if parts.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", parts.join("/"))
        }
    }

    /// Nodes visited walking from the root toward `path`: the root, every
    /// intermediate that exists, and the target if it exists. The walk
    /// stops early at the first missing segment or at a file, so a path
    /// with an absent leaf contributes only its existing prefix.
    pub fn access_chain(&self, path: &str, ctx: NodeId) -> Vec<NodeId> {
        let canon = self.canonicalize(path, ctx);
        let mut chain = vec![self.root];
        let mut cur = self.root;
        for seg in path::segments(&canon) {
            let Some(children) = self.node(cur).children() else { break };
            match children.get(seg) {
                Some(&child) => {
                    chain.push(child);
                    cur = child;
                }
                None => break,
            }
        }
        chain
    }

    // ---- creation ----

    /// Create a directory, making every missing trailing segment with
    /// mode `0o700` and the caller as owner. Fails with `AlreadyExists`
    /// when the full path already names a node.
    pub fn mkdir(&mut self, path: &str, ctx: NodeId, uid: u32, gid: u32) -> Result<NodeId> {
        self.mkdir_with(path, ctx, 0o700, uid, gid)
    }

    /// Like `mkdir` but with explicit mode, used when replaying a peer's
    /// mkdir so ownership and permissions converge.
    pub fn mkdir_with(
        &mut self,
        path: &str,
        ctx: NodeId,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<NodeId> {
        let (mut cur, missing) = self.prepare_mkdir(path, ctx)?;
        if missing.is_empty() {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        for name in missing {
            cur = self.link_child(cur, &name, |path, parent| {
                Node::directory(name.clone(), path, mode, uid, gid, Some(parent))
            });
        }
        Ok(cur)
    }

    /// Walk the path for mkdir: returns the deepest existing directory
    /// and the names still to create. Errors before anything mutates.
    fn prepare_mkdir(&self, path: &str, ctx: NodeId) -> Result<(NodeId, Vec<String>)> {
        let segs: Vec<&str> = path::segments(path).collect();
        let mut cur = if path::is_absolute(path) { self.root } else { ctx };
        let mut missing: Vec<String> = Vec::new();
        for (i, seg) in segs.iter().enumerate() {
            let seg = *seg;
            if seg == ".." {
                if !missing.is_empty() {
                    return Err(FsError::NotFound(path.to_string()));
                }
                cur = self.node(cur).parent.unwrap_or(cur);
                continue;
            }
            if missing.is_empty() {
                let node = self.node(cur);
                let Some(children) = node.children() else {
                    return Err(FsError::NotADirectory(node.path.clone()));
                };
                match children.get(seg) {
                    Some(&child) if self.node(child).is_dir() => cur = child,
                    Some(_) if i + 1 == segs.len() => {
                        return Err(FsError::AlreadyExists(path.to_string()));
                    }
                    Some(&child) => {
                        return Err(FsError::NotADirectory(self.node(child).path.clone()));
                    }
                    None => missing.push(seg.to_string()),
                }
            } else {
                missing.push(seg.to_string());
            }
        }
        Ok((cur, missing))
    }

    /// Create an empty file. The parent must already exist; any node at
    /// the leaf, file or directory, fails the call.
    pub fn touch(&mut self, path: &str, ctx: NodeId, uid: u32, gid: u32) -> Result<NodeId> {
        self.create_file(path, ctx, Vec::new(), 0o644, uid, gid)
    }

    /// Create a file with content and mode. Used by touch, upload,
    /// snapshot loading, and replay.
    pub fn create_file(
        &mut self,
        path: &str,
        ctx: NodeId,
        content: Vec<u8>,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<NodeId> {
        match self.lookup(path, ctx)? {
            Lookup::Found(_) => Err(FsError::AlreadyExists(path.to_string())),
            Lookup::Missing { parent, name } => {
                Ok(self.link_child(parent, &name, |path, parent| {
                    Node::file(name.clone(), path, mode, uid, gid, parent, content)
                }))
            }
        }
    }

    fn link_child(
        &mut self,
        parent: NodeId,
        name: &str,
        make: impl FnOnce(String, NodeId) -> Node,
    ) -> NodeId {
        let id = self.alloc();
        let child_path = path::child_path(self.path_of(parent), name);
        let node = make(child_path, parent);
        self.nodes.insert(id, node);
        if let Some(children) = self.node_mut(parent).children_mut() {
            children.insert(name.to_string(), id);
        }
        id
    }

    // ---- removal ----

    /// Unlink a single file. Directories are refused; use `remove_dir`.
    pub fn remove(&mut self, path: &str, ctx: NodeId) -> Result<String> {
        let id = self.resolve(path, ctx)?;
        if self.node(id).is_dir() {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        Ok(self.unlink_subtree(id))
    }

    /// Depth-first removal of a directory and everything beneath it.
    pub fn remove_dir(&mut self, path: &str, ctx: NodeId) -> Result<String> {
        let id = self.resolve(path, ctx)?;
        if !self.node(id).is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        Ok(self.unlink_subtree(id))
    }

    /// Drop `id` and all descendants from the arena and from the parent's
    /// children map. The root has no parent, so removing it recursively
    /// just empties the tree.
    fn unlink_subtree(&mut self, id: NodeId) -> String {
        let removed_path = self.path_of(id).to_string();
        let ids = self.collect_subtree(id);
        if id == self.root {
            for child in &ids[1..] {
                self.nodes.remove(child);
            }
            if let Some(children) = self.node_mut(self.root).children_mut() {
                children.clear();
            }
            return removed_path;
        }
        if let Some(parent) = self.node(id).parent {
            let name = self.node(id).name.clone();
            if let Some(children) = self.node_mut(parent).children_mut() {
                children.remove(&name);
            }
        }
        for node in ids {
            self.nodes.remove(&node);
        }
        removed_path
    }

    /// Ids of `id` and every descendant, parents before children.
    fn collect_subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            out.push(cur);
            if let Some(children) = self.node(cur).children() {
                stack.extend(children.values().copied());
            }
        }
        out
    }

    // ---- copy / rename ----

    /// Copy one file. The source must be a file, the destination leaf
    /// must be absent. Resident content is copied as-is; an evicted
    /// source yields an evicted copy with the same logical size.
    pub fn copy_file(
        &mut self,
        source: &str,
        dest: &str,
        ctx: NodeId,
        uid: u32,
        gid: u32,
    ) -> Result<FileCopy> {
        let src_id = self.resolve(source, ctx)?;
        let src = self.node(src_id);
        let (content, size, mode, src_path) = match &src.kind {
            NodeKind::Directory { .. } => return Err(FsError::IsDirectory(source.to_string())),
            NodeKind::File { content, size } => {
                (content.clone(), *size, src.mode, src.path.clone())
            }
        };
        let (parent, name) = match self.lookup(dest, ctx)? {
            Lookup::Found(_) => return Err(FsError::AlreadyExists(dest.to_string())),
            Lookup::Missing { parent, name } => (parent, name),
        };
        let id = self.link_child(parent, &name, |path, parent| {
            let mut node = Node::file(name.clone(), path, mode, uid, gid, parent, content);
            if let NodeKind::File { size: s, .. } = &mut node.kind {
                *s = size;
            }
            node
        });
        Ok(FileCopy { source: src_path, dest: self.path_of(id).to_string(), mode, size })
    }

    /// Copy a directory subtree. The destination must not exist and must
    /// not sit inside the source.
    pub fn copy_dir(
        &mut self,
        source: &str,
        dest: &str,
        ctx: NodeId,
        uid: u32,
        gid: u32,
    ) -> Result<DirCopy> {
        let src_id = self.resolve(source, ctx)?;
        if !self.node(src_id).is_dir() {
            return Err(FsError::NotADirectory(source.to_string()));
        }
        let (dst_parent, dst_name) = match self.lookup(dest, ctx)? {
            Lookup::Found(_) => return Err(FsError::AlreadyExists(dest.to_string())),
            Lookup::Missing { parent, name } => (parent, name),
        };
        let src_path = self.path_of(src_id).to_string();
        let dst_path = path::child_path(self.path_of(dst_parent), &dst_name);
        if dst_path == src_path || dst_path.starts_with(&format!("{src_path}/")) {
            return Err(FsError::RecursiveCopy(src_path));
        }

        let mut out = DirCopy {
            source: src_path,
            dest: dst_path,
            dirs: Vec::new(),
            files: Vec::new(),
        };
        // Snapshot the subtree before creating anything under the parent.
        let mut stack = vec![(src_id, dst_parent, dst_name)];
        while let Some((from, to_parent, to_name)) = stack.pop() {
            let node = self.node(from);
            match &node.kind {
                NodeKind::Directory { children } => {
                    let mode = node.mode;
                    let mut entries: Vec<(String, NodeId)> =
                        children.iter().map(|(n, &i)| (n.clone(), i)).collect();
                    entries.sort_by(|a, b| a.0.cmp(&b.0));
                    let new_dir = self.link_child(to_parent, &to_name, |path, parent| {
                        Node::directory(to_name.clone(), path, mode, uid, gid, Some(parent))
                    });
                    out.dirs.push((self.path_of(new_dir).to_string(), mode));
                    for (child_name, child_id) in entries {
                        stack.push((child_id, new_dir, child_name));
                    }
                }
                NodeKind::File { content, size } => {
                    let (content, size, mode, from_path) =
                        (content.clone(), *size, node.mode, node.path.clone());
                    let new_file = self.link_child(to_parent, &to_name, |path, parent| {
                        let mut n =
                            Node::file(to_name.clone(), path, mode, uid, gid, parent, content);
                        if let NodeKind::File { size: s, .. } = &mut n.kind {
                            *s = size;
                        }
                        n
                    });
                    out.files.push(FileCopy {
                        source: from_path,
                        dest: self.path_of(new_file).to_string(),
                        mode,
                        size,
                    });
                }
            }
        }
        Ok(out)
    }

    /// Copy then remove the source. Fails up front when the destination
    /// already exists, before anything is copied.
    pub fn rename(
        &mut self,
        source: &str,
        dest: &str,
        ctx: NodeId,
        uid: u32,
        gid: u32,
    ) -> Result<Renamed> {
        let src_id = self.resolve(source, ctx)?;
        if let Lookup::Found(_) = self.lookup(dest, ctx)? {
            return Err(FsError::AlreadyExists(dest.to_string()));
        }
        if self.node(src_id).is_dir() {
            let copy = self.copy_dir(source, dest, ctx, uid, gid)?;
            let removed = self.remove_dir(source, ctx)?;
            Ok(Renamed::Dir { copy, removed })
        } else {
            let copy = self.copy_file(source, dest, ctx, uid, gid)?;
            let removed = self.remove(source, ctx)?;
            Ok(Renamed::File { copy, removed })
        }
    }

    // ---- metadata ----

    pub fn stat(&self, path: &str, ctx: NodeId) -> Result<Stat> {
        let node = self.node(self.resolve(path, ctx)?);
        Ok(Stat {
            name: node.name.clone(),
            path: node.path.clone(),
            kind: node.entry_kind(),
            size: node.size(),
            resident: node.resident_len(),
            mode: node.mode,
            uid: node.uid,
            gid: node.gid,
            modified: node.modified,
        })
    }

    pub fn chmod(&mut self, path: &str, mode: u32, ctx: NodeId) -> Result<String> {
        let id = self.resolve(path, ctx)?;
        self.node_mut(id).mode = mode & 0o777;
        Ok(self.path_of(id).to_string())
    }

    pub fn chown(&mut self, path: &str, uid: u32, gid: u32, ctx: NodeId) -> Result<String> {
        let id = self.resolve(path, ctx)?;
        let node = self.node_mut(id);
        node.uid = uid;
        node.gid = gid;
        Ok(self.path_of(id).to_string())
    }

    /// Child names and kinds of a directory, sorted case-insensitively.
    pub fn list(&self, path: &str, ctx: NodeId) -> Result<Vec<(String, EntryKind)>> {
        let id = self.resolve_dir(path, ctx)?;
        let children = self.node(id).children().map(|c| c.iter()).into_iter().flatten();
        let mut out: Vec<(String, EntryKind)> = children
            .map(|(name, &child)| (name.clone(), self.node(child).entry_kind()))
            .collect();
        out.sort_by_key(|(name, _)| name.to_lowercase());
        Ok(out)
    }

    // ---- content ----

    /// Resident bytes of a file, with its id for cache bookkeeping.
    pub fn read(&self, path: &str, ctx: NodeId) -> Result<(NodeId, &[u8])> {
        let id = self.resolve(path, ctx)?;
        match &self.node(id).kind {
            NodeKind::Directory { .. } => Err(FsError::IsDirectory(path.to_string())),
            NodeKind::File { content, .. } => Ok((id, content.as_slice())),
        }
    }

    /// Replace a file's content, resetting the logical size to match.
    pub(crate) fn set_content(&mut self, id: NodeId, content: Vec<u8>) {
        let node = self.node_mut(id);
        if let NodeKind::File { content: c, size } = &mut node.kind {
            *size = content.len() as u64;
            *c = content;
            node.modified = SystemTime::now();
        }
    }

    /// Drop a file's resident bytes, keeping the logical size. Returns
    /// how many bytes were freed.
    pub(crate) fn truncate_resident(&mut self, id: NodeId) -> u64 {
        let node = self.node_mut(id);
        if let NodeKind::File { content, .. } = &mut node.kind {
            let freed = content.len() as u64;
            content.clear();
            content.shrink_to_fit();
            freed
        } else {
            0
        }
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Vfs {
        Vfs::new()
    }

    #[test]
    fn canonical_path_round_trips() {
        let mut fs = tree();
        let root = fs.root();
        fs.mkdir("/a/b/c", root, 1, 1).unwrap();
        for spelling in ["/a/b/c", "/a//b/./c/", "/a/b/c/../c", "a/b/../b/c"] {
            let id = fs.resolve(spelling, root).unwrap();
            assert_eq!(fs.path_of(id), "/a/b/c", "spelling {spelling}");
        }
    }

    #[test]
    fn dotdot_stops_at_root() {
        let mut fs = tree();
        let root = fs.root();
        fs.mkdir("/a", root, 1, 1).unwrap();
        let id = fs.resolve("/../../a", root).unwrap();
        assert_eq!(fs.path_of(id), "/a");
    }

    #[test]
    fn file_in_the_middle_is_not_a_directory() {
        let mut fs = tree();
        let root = fs.root();
        fs.touch("/f", root, 1, 1).unwrap();
        assert!(matches!(fs.resolve("/f/x", root), Err(FsError::NotADirectory(_))));
        assert!(matches!(fs.lookup("/f/x", root), Err(FsError::NotADirectory(_))));
    }

    #[test]
    fn missing_intermediate_is_not_found() {
        let fs = tree();
        let root = fs.root();
        assert!(matches!(fs.resolve("/no/such", root), Err(FsError::NotFound(_))));
    }

    #[test]
    fn mkdir_creates_trailing_segments() {
        let mut fs = tree();
        let root = fs.root();
        fs.mkdir("/a", root, 7, 7).unwrap();
        fs.mkdir("/a/b/c/d", root, 7, 7).unwrap();
        let stat = fs.stat("/a/b/c/d", root).unwrap();
        assert_eq!(stat.kind, EntryKind::Directory);
        assert_eq!(stat.mode, 0o700);
        assert_eq!(stat.uid, 7);
        assert!(matches!(
            fs.mkdir("/a/b/c/d", root, 7, 7),
            Err(FsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn mkdir_over_file_fails() {
        let mut fs = tree();
        let root = fs.root();
        fs.touch("/f", root, 1, 1).unwrap();
        assert!(matches!(fs.mkdir("/f", root, 1, 1), Err(FsError::AlreadyExists(_))));
        assert!(matches!(fs.mkdir("/f/sub", root, 1, 1), Err(FsError::NotADirectory(_))));
    }

    #[test]
    fn touch_fails_on_any_existing_node() {
        let mut fs = tree();
        let root = fs.root();
        fs.mkdir("/d", root, 1, 1).unwrap();
        fs.touch("/d/f", root, 1, 1).unwrap();
        assert!(matches!(fs.touch("/d/f", root, 1, 1), Err(FsError::AlreadyExists(_))));
        assert!(matches!(fs.touch("/d", root, 1, 1), Err(FsError::AlreadyExists(_))));
        assert!(matches!(fs.touch("/no/f", root, 1, 1), Err(FsError::NotFound(_))));
    }

    #[test]
    fn remove_distinguishes_files_and_directories() {
        let mut fs = tree();
        let root = fs.root();
        fs.mkdir("/d", root, 1, 1).unwrap();
        fs.touch("/d/f", root, 1, 1).unwrap();
        assert!(matches!(fs.remove("/gone", root), Err(FsError::NotFound(_))));
        assert!(matches!(fs.remove("/d", root), Err(FsError::IsDirectory(_))));
        assert_eq!(fs.remove("/d/f", root).unwrap(), "/d/f");
        assert!(matches!(fs.resolve("/d/f", root), Err(FsError::NotFound(_))));
    }

    #[test]
    fn remove_dir_drops_the_whole_subtree() {
        let mut fs = tree();
        let root = fs.root();
        fs.mkdir("/d/sub", root, 1, 1).unwrap();
        fs.touch("/d/f", root, 1, 1).unwrap();
        fs.touch("/d/sub/g", root, 1, 1).unwrap();
        let before = fs.nodes.len();
        assert_eq!(fs.remove_dir("/d", root).unwrap(), "/d");
        assert_eq!(fs.nodes.len(), before - 4);
        assert!(matches!(fs.resolve("/d", root), Err(FsError::NotFound(_))));
        assert!(matches!(fs.resolve("/d/sub/g", root), Err(FsError::NotFound(_))));
    }

    #[test]
    fn remove_dir_on_root_empties_the_tree() {
        let mut fs = tree();
        let root = fs.root();
        fs.mkdir("/a/b", root, 1, 1).unwrap();
        fs.touch("/f", root, 1, 1).unwrap();
        assert_eq!(fs.remove_dir("/", root).unwrap(), "/");
        assert!(fs.list("/", root).unwrap().is_empty());
        assert_eq!(fs.path_of(fs.root()), "/");
    }

    #[test]
    fn copy_file_clones_content_and_keeps_logical_size() {
        let mut fs = tree();
        let root = fs.root();
        fs.create_file("/src", root, b"hello".to_vec(), 0o640, 3, 3).unwrap();
        let copy = fs.copy_file("/src", "/dst", root, 9, 9).unwrap();
        assert_eq!(copy.source, "/src");
        assert_eq!(copy.dest, "/dst");
        assert_eq!(copy.mode, 0o640);
        let stat = fs.stat("/dst", root).unwrap();
        assert_eq!(stat.size, 5);
        assert_eq!(stat.uid, 9);
        let (_, content) = fs.read("/dst", root).unwrap();
        assert_eq!(content, b"hello");
        assert!(matches!(
            fs.copy_file("/src", "/dst", root, 9, 9),
            Err(FsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn copy_dir_maps_the_subtree_under_dest() {
        let mut fs = tree();
        let root = fs.root();
        fs.mkdir("/a/inner", root, 1, 1).unwrap();
        fs.create_file("/a/f", root, b"x".to_vec(), 0o600, 1, 1).unwrap();
        fs.create_file("/a/inner/g", root, b"yz".to_vec(), 0o600, 1, 1).unwrap();
        let copy = fs.copy_dir("/a", "/b", root, 1, 1).unwrap();
        assert_eq!(copy.dest, "/b");
        assert_eq!(copy.dirs.len(), 2);
        assert_eq!(copy.files.len(), 2);
        assert_eq!(fs.stat("/b/inner/g", root).unwrap().size, 2);
        assert_eq!(fs.read("/b/f", root).unwrap().1, b"x");
        // The original subtree is untouched.
        assert_eq!(fs.read("/a/f", root).unwrap().1, b"x");
    }

    #[test]
    fn copy_dir_into_itself_is_refused() {
        let mut fs = tree();
        let root = fs.root();
        fs.mkdir("/a", root, 1, 1).unwrap();
        assert!(matches!(
            fs.copy_dir("/a", "/a/b", root, 1, 1),
            Err(FsError::RecursiveCopy(_))
        ));
    }

    #[test]
    fn rename_moves_and_unlinks_source() {
        let mut fs = tree();
        let root = fs.root();
        fs.create_file("/f", root, b"data".to_vec(), 0o600, 1, 1).unwrap();
        match fs.rename("/f", "/g", root, 1, 1).unwrap() {
            Renamed::File { copy, removed } => {
                assert_eq!(copy.dest, "/g");
                assert_eq!(removed, "/f");
            }
            Renamed::Dir { .. } => panic!("expected file rename"),
        }
        assert!(matches!(fs.resolve("/f", root), Err(FsError::NotFound(_))));
        assert_eq!(fs.read("/g", root).unwrap().1, b"data");

        fs.touch("/h", root, 1, 1).unwrap();
        assert!(matches!(fs.rename("/g", "/h", root, 1, 1), Err(FsError::AlreadyExists(_))));
    }

    #[test]
    fn list_sorts_case_insensitively() {
        let mut fs = tree();
        let root = fs.root();
        fs.mkdir("/Beta", root, 1, 1).unwrap();
        fs.touch("/alpha", root, 1, 1).unwrap();
        fs.touch("/Gamma", root, 1, 1).unwrap();
        let names: Vec<String> = fs.list("/", root).unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["alpha", "Beta", "Gamma"]);
        assert!(matches!(fs.list("/alpha", root), Err(FsError::NotADirectory(_))));
    }

    #[test]
    fn relative_paths_resolve_from_the_context() {
        let mut fs = tree();
        let root = fs.root();
        fs.mkdir("/a/b", root, 1, 1).unwrap();
        let a = fs.resolve("/a", root).unwrap();
        fs.touch("b/f", a, 1, 1).unwrap();
        assert_eq!(fs.path_of(fs.resolve("/a/b/f", root).unwrap()), "/a/b/f");
        assert_eq!(fs.path_of(fs.resolve("..", a).unwrap()), "/");
    }

    #[test]
    fn eviction_keeps_logical_size() {
        let mut fs = tree();
        let root = fs.root();
        fs.create_file("/f", root, b"0123456789".to_vec(), 0o600, 1, 1).unwrap();
        let id = fs.resolve("/f", root).unwrap();
        assert_eq!(fs.truncate_resident(id), 10);
        let stat = fs.stat("/f", root).unwrap();
        assert_eq!(stat.size, 10);
        assert_eq!(stat.resident, 0);
        assert!(fs.node(id).is_evicted());
    }

    #[test]
    fn chmod_and_chown_update_metadata() {
        let mut fs = tree();
        let root = fs.root();
        fs.touch("/f", root, 1, 1).unwrap();
        fs.chmod("/f", 0o750, root).unwrap();
        fs.chown("/f", 5, 6, root).unwrap();
        let stat = fs.stat("/f", root).unwrap();
        assert_eq!(stat.mode, 0o750);
        assert_eq!((stat.uid, stat.gid), (5, 6));
        assert_eq!(fs.node(fs.resolve("/f", root).unwrap()).mode_string(), "-rwxr-x---");
    }
}
