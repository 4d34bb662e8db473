//! Permission checks layered in front of the tree.
//!
//! Effective access to a path is the bitwise AND of one triplet per node
//! on the walk from the root to the target, target included. At each node
//! the owner triplet applies when the caller's uid matches the node's
//! owner, otherwise the *other* triplet; the group triplet is never
//! consulted. A single restrictive ancestor therefore caps everything
//! beneath it, which is stricter than plain Unix and intentional.
//!
//! Checks run before the tree mutates; a denied command leaves no trace.

use bitflags::bitflags;

use crate::dispatch::ShellCommand;
use crate::error::{FsError, Result};
use crate::identity::Identity;
use crate::vfs::{Lookup, Node, NodeId, Vfs};

bitflags! {
    /// One `rwx` triplet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rwx: u8 {
        const READ = 0b100;
        const WRITE = 0b010;
        const EXEC = 0b001;
    }
}

impl Rwx {
    /// The low three bits of a mode group.
    pub fn from_mode_bits(bits: u32) -> Self {
        Self::from_bits_truncate((bits & 0o7) as u8)
    }

    /// The triplet `who` gets on `node`: owner bits for the owner,
    /// other bits for everyone else. Group is deliberately skipped.
    pub fn for_node(node: &Node, uid: u32) -> Self {
        if uid == node.uid {
            Self::from_mode_bits(node.mode >> 6)
        } else {
            Self::from_mode_bits(node.mode)
        }
    }
}

impl std::fmt::Display for Rwx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.contains(Rwx::READ) { 'r' } else { '-' },
            if self.contains(Rwx::WRITE) { 'w' } else { '-' },
            if self.contains(Rwx::EXEC) { 'x' } else { '-' },
        )
    }
}

/// Effective access for `uid` over `path`: AND-fold of the selected
/// triplet of every node on the existing walk toward the target. A path
/// with a missing leaf folds only its existing prefix, so a brand-new
/// name under a writable directory stays writable.
pub fn effective(fs: &Vfs, path: &str, ctx: NodeId, uid: u32) -> Rwx {
    fs.access_chain(path, ctx)
        .into_iter()
        .fold(Rwx::all(), |acc, id| acc & Rwx::for_node(fs.node(id), uid))
}

/// Check that `required` is contained in the caller's effective access.
/// Bits absent from `required` are don't-cares.
fn require(fs: &Vfs, path: &str, ctx: NodeId, who: &Identity, required: Rwx) -> Result<()> {
    if effective(fs, path, ctx, who.uid).contains(required) {
        Ok(())
    } else {
        Err(FsError::Unauthorized)
    }
}

/// The mkdir rule checks the parent of the target, not the target.
fn require_on_parent(
    fs: &Vfs,
    path: &str,
    ctx: NodeId,
    who: &Identity,
    required: Rwx,
) -> Result<()> {
    let canon = fs.canonicalize(path, ctx);
    let parent = match canon.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &canon[..i],
    };
    require(fs, parent, ctx, who, required)
}

fn require_owner(fs: &Vfs, path: &str, ctx: NodeId, who: &Identity) -> Result<()> {
    let id = fs.resolve(path, ctx)?;
    if fs.node(id).uid == who.uid {
        Ok(())
    } else {
        Err(FsError::Unauthorized)
    }
}

/// Copy and upload validate their paths before the triplets, so a bad
/// path reports as such instead of as a permission problem.
fn check_copy_paths(fs: &Vfs, source: &str, dest: &str, ctx: NodeId) -> Result<()> {
    fs.resolve(source, ctx)?;
    if let Lookup::Found(_) = fs.lookup(dest, ctx)? {
        return Err(FsError::AlreadyExists(dest.to_string()));
    }
    Ok(())
}

/// Authorize one parsed command for `who`. Elevated roles skip every
/// check. Commands without an entry here (ls, pwd, stat, touch, chown,
/// mv) carry no permission requirement.
pub fn authorize(fs: &Vfs, cmd: &ShellCommand, cwd: NodeId, who: &Identity) -> Result<()> {
    if who.role.is_elevated() {
        return Ok(());
    }
    match cmd {
        ShellCommand::Cp { source, dest, recursive: false } => {
            check_copy_paths(fs, source, dest, cwd)?;
            require(fs, source, cwd, who, Rwx::READ)?;
            require(fs, dest, cwd, who, Rwx::WRITE)
        }
        ShellCommand::Cp { source, dest, recursive: true } => {
            check_copy_paths(fs, source, dest, cwd)?;
            require(fs, source, cwd, who, Rwx::READ | Rwx::EXEC)?;
            require(fs, dest, cwd, who, Rwx::READ | Rwx::WRITE)
        }
        ShellCommand::Rm { path, .. } => require(fs, path, cwd, who, Rwx::WRITE | Rwx::EXEC),
        ShellCommand::Upload { dest, recursive: false, .. } => {
            if let Lookup::Found(_) = fs.lookup(dest, cwd)? {
                return Err(FsError::AlreadyExists(dest.to_string()));
            }
            require(fs, dest, cwd, who, Rwx::WRITE)
        }
        ShellCommand::Upload { dest, recursive: true, .. } => {
            fs.resolve_dir(dest, cwd)?;
            require(fs, dest, cwd, who, Rwx::WRITE | Rwx::EXEC)
        }
        ShellCommand::Mkdir { paths } => {
            for path in paths {
                require_on_parent(fs, path, cwd, who, Rwx::WRITE | Rwx::EXEC)?;
            }
            Ok(())
        }
        ShellCommand::Cat { path } => require(fs, path, cwd, who, Rwx::READ),
        ShellCommand::Cd { path } => require(fs, path, cwd, who, Rwx::EXEC),
        ShellCommand::Download { source, .. } => require(fs, source, cwd, who, Rwx::READ),
        ShellCommand::Chmod { path, .. } => require_owner(fs, path, cwd, who),
        ShellCommand::Migrate { .. } => Err(FsError::Unauthorized),
        _ => Ok(()),
    }
}
