// Library crate for mirrorfs: an in-memory filesystem shared by multiple
// clients over a replication bus, with per-path permissions and a byte
// budget on resident file content.

pub mod access;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod remote;
pub mod replicate;
pub mod restore;
pub mod vfs;

// re-export selected public API
pub use dispatch::{Output, Session, ShellCommand, Volume};
pub use error::{FsError, Result};
pub use identity::{Identity, Role};
pub use replicate::{InProcessBus, MessageBus, Publisher, spawn_consumer};
