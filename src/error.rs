//! Error taxonomy shared across the crate.

/// Failures surfaced by tree operations, authorization, the content cache
/// and the replication path.
///
/// Replication publish failures are deliberately *not* part of command
/// results: the local tree stays authoritative, so the publisher only logs
/// and reports them through its outcome channel.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("is a directory: {0}")]
    IsDirectory(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("you are not permitted to perform this action")]
    Unauthorized,
    #[error("cannot copy {0} into itself")]
    RecursiveCopy(String),
    #[error("object of {size} bytes exceeds cache capacity of {capacity} bytes")]
    CapacityExceeded { size: u64, capacity: u64 },
    #[error("file of {size} bytes exceeds the configured upload limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("{0}: command not found")]
    UnknownCommand(String),
    #[error("migrate: {0}")]
    Migrate(&'static str),
    #[error("remote request failed: {0}")]
    Remote(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;

impl FsError {
    /// True for outcomes a replaying consumer treats as no-ops: the peer
    /// already holds (or already dropped) the node the command touches.
    /// At-least-once delivery makes these expected, not fatal.
    pub fn is_benign_on_replay(&self) -> bool {
        matches!(self, FsError::NotFound(_) | FsError::AlreadyExists(_))
    }
}
