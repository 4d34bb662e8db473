//! Snapshot restore: load a `.tar.gz` archive into the volume.
//!
//! Restore runs before the session starts taking commands, so entries
//! bypass authorization. File bodies go through the cache on the way in,
//! which means a snapshot larger than the byte budget loads with the
//! least recently added bodies already evicted.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use log::{info, warn};
use tar::{Archive, EntryType};
use tokio::sync::Mutex;

use crate::dispatch::Volume;
use crate::error::FsError;

struct SnapshotEntry {
    path: String,
    mode: u32,
    kind: SnapshotKind,
}

enum SnapshotKind {
    Dir,
    File(Vec<u8>),
}

/// Decompress and read the archive off the host filesystem. Runs on the
/// blocking pool.
async fn read_archive(path: PathBuf) -> Result<Vec<SnapshotEntry>> {
    tokio::task::spawn_blocking(move || {
        let tar_gz = File::open(&path)
            .with_context(|| format!("Failed to open snapshot {}", path.display()))?;
        let decoder = GzDecoder::new(tar_gz);
        let mut archive = Archive::new(decoder);
        let mut out = Vec::new();
        for entry in archive.entries().context("Failed to read snapshot entries")? {
            let mut entry = entry.context("Failed to read snapshot entry")?;
            let mode = entry.header().mode().unwrap_or(0o644) & 0o777;
            let entry_type = entry.header().entry_type();
            let rel = entry.path().context("Snapshot entry has an unreadable path")?;
            let rel = rel.to_string_lossy().into_owned();
            let rel = rel.trim_start_matches("./").trim_matches('/');
            if rel.is_empty() {
                continue;
            }
            let path = format!("/{rel}");
            match entry_type {
                EntryType::Directory => {
                    out.push(SnapshotEntry { path, mode, kind: SnapshotKind::Dir });
                }
                EntryType::Regular => {
                    let mut content = Vec::with_capacity(entry.size() as usize);
                    entry
                        .read_to_end(&mut content)
                        .with_context(|| format!("Failed to read snapshot body of {path}"))?;
                    out.push(SnapshotEntry { path, mode, kind: SnapshotKind::File(content) });
                }
                other => {
                    warn!("snapshot entry {path} has unsupported type {other:?}, skipped");
                }
            }
        }
        Ok(out)
    })
    .await
    .context("Failed to spawn blocking task for snapshot read")?
}

fn parent_of(path: &str) -> Option<&str> {
    let idx = path.rfind('/')?;
    if idx == 0 { None } else { Some(&path[..idx]) }
}

/// Load a snapshot archive into the volume as `uid`:`gid`, creating
/// missing parent directories on the way. Entries that are already
/// present are skipped; anything else that fails to apply is logged and
/// skipped so one bad entry never aborts the load.
pub async fn restore_into(
    volume: &Mutex<Volume>,
    archive: &Path,
    uid: u32,
    gid: u32,
) -> Result<()> {
    let entries = read_archive(archive.to_path_buf()).await?;
    let mut guard = volume.lock().await;
    let vol = &mut *guard;
    let root = vol.tree.root();
    let mut dirs = 0usize;
    let mut files = 0usize;
    for entry in entries {
        let applied = match entry.kind {
            SnapshotKind::Dir => {
                vol.tree.mkdir_with(&entry.path, root, entry.mode, uid, gid).map(|_| dirs += 1)
            }
            SnapshotKind::File(content) => {
                if let Some(parent) = parent_of(&entry.path) {
                    match vol.tree.mkdir_with(parent, root, 0o755, uid, gid) {
                        Ok(_) | Err(FsError::AlreadyExists(_)) => {}
                        Err(err) => {
                            warn!("snapshot entry {} skipped: {err}", entry.path);
                            continue;
                        }
                    }
                }
                vol.tree.create_file(&entry.path, root, content, entry.mode, uid, gid).map(|id| {
                    vol.cache.absorb(&mut vol.tree, id);
                    files += 1;
                })
            }
        };
        match applied {
            Ok(()) | Err(FsError::AlreadyExists(_)) => {}
            Err(err) => warn!("snapshot entry {} skipped: {err}", entry.path),
        }
    }
    info!("snapshot {} restored: {dirs} directories, {files} files", archive.display());
    Ok(())
}
