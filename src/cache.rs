//! Byte-budgeted LRU tracking of which file bodies stay resident.
//!
//! The cache does not own any content; file bytes always live in their
//! tree node. It tracks how many resident bytes each path holds and,
//! when the running total would pass the budget, truncates the least
//! recently used bodies in the tree. Logical sizes survive eviction, so
//! an evicted file stats normally and reads re-fetch from the origin.

use lru::LruCache;

use crate::error::{FsError, Result};
use crate::vfs::{NodeId, Vfs};

pub struct ContentCache {
    /// Path to resident byte count, most recent first.
    entries: LruCache<String, u64>,
    total: u64,
    capacity: u64,
}

impl ContentCache {
    pub fn new(capacity: u64) -> Self {
        Self { entries: LruCache::unbounded(), total: 0, capacity }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Sum of resident bytes over every tracked path.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an object of `size` bytes can ever be held. Callers check
    /// this before writing content so a refusal leaves no half state.
    pub fn fits(&self, size: u64) -> Result<()> {
        if size > self.capacity {
            Err(FsError::CapacityExceeded { size, capacity: self.capacity })
        } else {
            Ok(())
        }
    }

    /// Write `content` into the file node and start tracking it.
    pub fn insert(&mut self, fs: &mut Vfs, id: NodeId, content: Vec<u8>) -> Result<()> {
        self.fits(content.len() as u64)?;
        fs.set_content(id, content);
        self.track(fs, id)
    }

    /// Track the resident bytes already present on a node, evicting
    /// least recently used bodies until the total fits the budget.
    /// Re-tracking a known path promotes it and adjusts the total by the
    /// size delta.
    pub fn track(&mut self, fs: &mut Vfs, id: NodeId) -> Result<()> {
        let resident = fs.node(id).resident_len();
        self.fits(resident)?;
        let path = fs.path_of(id).to_string();

        if let Some(old) = self.entries.pop(&path) {
            self.total -= old;
        }
        while self.total + resident > self.capacity {
            let Some((victim, bytes)) = self.entries.pop_lru() else { break };
            self.total -= bytes;
            if let Ok(victim_id) = fs.resolve(&victim, fs.root()) {
                fs.truncate_resident(victim_id);
            }
        }
        self.total += resident;
        self.entries.put(path, resident);
        Ok(())
    }

    /// Track content that was materialized outside the pre-checked
    /// upload path (copies, replication, snapshot loads). A body the
    /// budget can never hold is truncated back out of the tree instead
    /// of failing the operation; the logical size stays.
    pub fn absorb(&mut self, fs: &mut Vfs, id: NodeId) {
        if self.track(fs, id).is_err() {
            fs.truncate_resident(id);
        }
    }

    /// Promote `path` and report its resident byte count, if tracked.
    pub fn get(&mut self, path: &str) -> Option<u64> {
        self.entries.get(path).copied()
    }

    /// Stop tracking a removed or renamed file.
    pub fn forget(&mut self, path: &str) {
        if let Some(bytes) = self.entries.pop(path) {
            self.total -= bytes;
        }
    }

    /// Stop tracking everything under a removed directory.
    pub fn forget_subtree(&mut self, dir: &str) {
        let prefix = if dir == "/" { "/".to_string() } else { format!("{dir}/") };
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(path, _)| path.clone())
            .collect();
        for path in doomed {
            self.forget(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(fs: &mut Vfs, path: &str, len: usize) -> NodeId {
        let root = fs.root();
        fs.create_file(path, root, vec![b'a'; len], 0o644, 1, 1).unwrap()
    }

    #[test]
    fn eviction_truncates_but_keeps_logical_size() {
        let mut fs = Vfs::new();
        let mut cache = ContentCache::new(100);
        let first = file(&mut fs, "/first", 60);
        let second = file(&mut fs, "/second", 60);

        cache.track(&mut fs, first).unwrap();
        cache.track(&mut fs, second).unwrap();

        assert_eq!(cache.total(), 60);
        assert_eq!(cache.len(), 1);
        let stat = fs.stat("/first", fs.root()).unwrap();
        assert_eq!(stat.size, 60, "logical size survives eviction");
        assert_eq!(stat.resident, 0);
        assert_eq!(fs.stat("/second", fs.root()).unwrap().resident, 60);
        assert!(cache.get("/first").is_none());
        assert_eq!(cache.get("/second"), Some(60));
    }

    #[test]
    fn eviction_loops_until_the_insertion_fits() {
        let mut fs = Vfs::new();
        let mut cache = ContentCache::new(100);
        for (path, len) in [("/a", 30), ("/b", 30), ("/c", 30)] {
            let id = file(&mut fs, path, len);
            cache.track(&mut fs, id).unwrap();
        }
        let big = file(&mut fs, "/big", 90);
        cache.track(&mut fs, big).unwrap();

        assert_eq!(cache.total(), 90);
        assert_eq!(cache.len(), 1);
        for path in ["/a", "/b", "/c"] {
            assert_eq!(fs.stat(path, fs.root()).unwrap().resident, 0, "{path}");
        }
    }

    #[test]
    fn get_promotes_the_entry() {
        let mut fs = Vfs::new();
        let mut cache = ContentCache::new(100);
        let a = file(&mut fs, "/a", 40);
        let b = file(&mut fs, "/b", 40);
        cache.track(&mut fs, a).unwrap();
        cache.track(&mut fs, b).unwrap();
        // Touch /a so /b becomes the eviction candidate.
        assert_eq!(cache.get("/a"), Some(40));

        let c = file(&mut fs, "/c", 40);
        cache.track(&mut fs, c).unwrap();
        assert_eq!(cache.get("/a"), Some(40));
        assert!(cache.get("/b").is_none());
    }

    #[test]
    fn retracking_adjusts_by_the_delta() {
        let mut fs = Vfs::new();
        let mut cache = ContentCache::new(100);
        let id = file(&mut fs, "/f", 40);
        cache.track(&mut fs, id).unwrap();
        assert_eq!(cache.total(), 40);

        cache.insert(&mut fs, id, vec![b'z'; 70]).unwrap();
        assert_eq!(cache.total(), 70);
        assert_eq!(cache.len(), 1);
        assert_eq!(fs.read("/f", fs.root()).unwrap().1.len(), 70);
    }

    #[test]
    fn oversize_objects_are_refused_up_front() {
        let mut fs = Vfs::new();
        let mut cache = ContentCache::new(50);
        let id = file(&mut fs, "/huge", 80);
        assert!(matches!(
            cache.track(&mut fs, id),
            Err(FsError::CapacityExceeded { size: 80, capacity: 50 })
        ));
        assert_eq!(cache.total(), 0);
        // The refusal did not evict anyone.
        let small = file(&mut fs, "/small", 10);
        cache.track(&mut fs, small).unwrap();
        assert_eq!(cache.total(), 10);
    }

    #[test]
    fn forget_subtree_drops_everything_underneath() {
        let mut fs = Vfs::new();
        let root = fs.root();
        fs.mkdir("/d/sub", root, 1, 1).unwrap();
        let f = fs.create_file("/d/f", root, vec![0; 10], 0o644, 1, 1).unwrap();
        let g = fs.create_file("/d/sub/g", root, vec![0; 20], 0o644, 1, 1).unwrap();
        let out = fs.create_file("/dog", root, vec![0; 5], 0o644, 1, 1).unwrap();
        let mut cache = ContentCache::new(100);
        for id in [f, g, out] {
            cache.track(&mut fs, id).unwrap();
        }
        cache.forget_subtree("/d");
        assert_eq!(cache.total(), 5, "sibling /dog is untouched");
        assert_eq!(cache.get("/dog"), Some(5));
        assert!(cache.get("/d/f").is_none());
    }
}
