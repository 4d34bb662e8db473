//! Replays peer mutations into the local tree.
//!
//! The consumer owns a subscription for the session's lifetime: decode,
//! drop own echoes, take the volume lock, apply. Replay skips every
//! permission check, because the publishing side already authorized the
//! mutation against the same rules.
//!
//! Delivery is at least once and may reorder, so replay tolerates the
//! benign outcomes that produces: a mkdir that already happened or a
//! remove that already won just log and move on. Anything else is a real
//! divergence and is logged loudly.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Volume;
use crate::error::Result;
use crate::replicate::bus::MessageBus;
use crate::replicate::command::{Command, Verb};

/// Apply one wire command to the volume, without authorization. Returns
/// the canonical path the mutation landed on.
pub fn replay(volume: &mut Volume, cmd: &Command) -> Result<String> {
    let root = volume.tree.root();
    match cmd.verb {
        Verb::Mkdir => {
            let id = volume.tree.mkdir_with(&cmd.source, root, cmd.mode, cmd.uid, cmd.gid)?;
            Ok(volume.tree.path_of(id).to_string())
        }
        Verb::Touch => {
            let id =
                volume.tree.create_file(&cmd.source, root, Vec::new(), cmd.mode, cmd.uid, cmd.gid)?;
            Ok(volume.tree.path_of(id).to_string())
        }
        Verb::Remove => {
            let path = volume.tree.remove(&cmd.source, root)?;
            volume.cache.forget(&path);
            Ok(path)
        }
        Verb::RemoveDir => {
            let path = volume.tree.remove_dir(&cmd.source, root)?;
            volume.cache.forget_subtree(&path);
            Ok(path)
        }
        Verb::Copy => {
            let copy = volume.tree.copy_file(&cmd.source, &cmd.dest, root, cmd.uid, cmd.gid)?;
            let id = volume.tree.resolve(&copy.dest, root)?;
            volume.cache.absorb(&mut volume.tree, id);
            Ok(copy.dest)
        }
        Verb::Chmod => volume.tree.chmod(&cmd.source, cmd.mode, root),
        Verb::Chown => volume.tree.chown(&cmd.source, cmd.uid, cmd.gid, root),
        Verb::Upload => {
            let id = volume.tree.create_file(
                &cmd.source,
                root,
                cmd.payload.clone(),
                cmd.mode,
                cmd.uid,
                cmd.gid,
            )?;
            volume.cache.absorb(&mut volume.tree, id);
            Ok(volume.tree.path_of(id).to_string())
        }
    }
}

/// Subscribe to `topic` and replay every peer command until cancelled.
/// The subscription is taken before the task starts, so commands
/// published right after this call are never missed.
pub fn spawn_consumer(
    bus: &dyn MessageBus,
    topic: &str,
    volume: Arc<Mutex<Volume>>,
    client_id: String,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe(topic);
    tokio::spawn(async move {
        loop {
            let bytes = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Ok(bytes) => bytes,
                    Err(RecvError::Lagged(n)) => {
                        warn!("replication consumer lagged, {n} message(s) skipped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            let cmd = match Command::decode(&bytes) {
                Ok(cmd) => cmd,
                Err(err) => {
                    warn!("replication consumer: undecodable message dropped: {err}");
                    continue;
                }
            };
            if cmd.origin == client_id {
                debug!("replication consumer: dropping own echo of {} {}", cmd.verb, cmd.source);
                continue;
            }
            let mut volume = volume.lock().await;
            match replay(&mut volume, &cmd) {
                Ok(path) => debug!("replayed {} {path} from {}", cmd.verb, cmd.origin),
                Err(err) if err.is_benign_on_replay() => {
                    debug!("replay of {} {} was a no-op: {err}", cmd.verb, cmd.source);
                }
                Err(err) => {
                    warn!("replay of {} {} from {} failed: {err}", cmd.verb, cmd.source, cmd.origin);
                }
            }
        }
        debug!("replication consumer stopped");
    })
}
