//! The virtual filesystem tree and path machinery.

pub mod node;
pub mod path;
pub mod tree;

pub use node::{EntryKind, Node, NodeId, NodeKind};
pub use tree::{DirCopy, FileCopy, Lookup, Renamed, Stat, Vfs};
