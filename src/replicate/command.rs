//! The wire format for replicated mutations.
//!
//! Every locally committed mutation becomes one `Command`, encoded with
//! bincode and published to the shared topic. A command is built once,
//! after the local tree has already changed, and never mutated again.

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Mutation kinds that peers replay. Matching on this enum is the whole
/// dispatch story; there is deliberately no name-based lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verb {
    Mkdir,
    Touch,
    Remove,
    RemoveDir,
    Copy,
    Chmod,
    Chown,
    Upload,
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Verb::Mkdir => "mkdir",
            Verb::Touch => "touch",
            Verb::Remove => "rm",
            Verb::RemoveDir => "rm -r",
            Verb::Copy => "cp",
            Verb::Chmod => "chmod",
            Verb::Chown => "chown",
            Verb::Upload => "upload",
        };
        f.write_str(s)
    }
}

/// One replicated mutation. Paths are canonical and absolute, so replay
/// never depends on the publisher's working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub verb: Verb,
    pub source: String,
    /// Second path for `cp`; empty otherwise.
    pub dest: String,
    /// File content for `upload`; empty otherwise.
    pub payload: Vec<u8>,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Chunk ordinal, always 0 until chunked transfer exists.
    pub offset: u64,
    /// Client id of the publisher; consumers drop their own echoes.
    pub origin: String,
    pub token: String,
}

impl Command {
    fn base(verb: Verb, source: String, who: &Identity) -> Self {
        Self {
            verb,
            source,
            dest: String::new(),
            payload: Vec::new(),
            mode: 0,
            uid: who.uid,
            gid: who.gid,
            offset: 0,
            origin: who.client_id.clone(),
            token: who.token.clone(),
        }
    }

    pub fn mkdir(path: String, mode: u32, who: &Identity) -> Self {
        Self { mode, ..Self::base(Verb::Mkdir, path, who) }
    }

    pub fn touch(path: String, mode: u32, who: &Identity) -> Self {
        Self { mode, ..Self::base(Verb::Touch, path, who) }
    }

    pub fn remove(path: String, who: &Identity) -> Self {
        Self::base(Verb::Remove, path, who)
    }

    pub fn remove_dir(path: String, who: &Identity) -> Self {
        Self::base(Verb::RemoveDir, path, who)
    }

    pub fn copy(source: String, dest: String, mode: u32, who: &Identity) -> Self {
        Self { dest, mode, ..Self::base(Verb::Copy, source, who) }
    }

    pub fn chmod(path: String, mode: u32, who: &Identity) -> Self {
        Self { mode, ..Self::base(Verb::Chmod, path, who) }
    }

    /// `uid`/`gid` here are the new owner, not the caller.
    pub fn chown(path: String, uid: u32, gid: u32, who: &Identity) -> Self {
        Self { uid, gid, ..Self::base(Verb::Chown, path, who) }
    }

    pub fn upload(path: String, payload: Vec<u8>, mode: u32, who: &Identity) -> Self {
        Self { payload, mode, ..Self::base(Verb::Upload, path, who) }
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;

    #[test]
    fn commands_survive_the_wire() {
        let who = Identity::offline(4, 5, Role::Normal);
        let cmd = Command::upload("/a/b".into(), b"bytes".to_vec(), 0o640, &who);
        let back = Command::decode(&cmd.encode().unwrap()).unwrap();
        assert_eq!(back.verb, Verb::Upload);
        assert_eq!(back.source, "/a/b");
        assert_eq!(back.payload, b"bytes");
        assert_eq!(back.mode, 0o640);
        assert_eq!(back.origin, who.client_id);
    }

    #[test]
    fn chown_carries_the_new_owner() {
        let who = Identity::offline(4, 5, Role::Normal);
        let cmd = Command::chown("/f".into(), 10, 11, &who);
        assert_eq!((cmd.uid, cmd.gid), (10, 11));
        assert_eq!(cmd.origin, who.client_id);
    }

    #[test]
    fn verbs_render_like_shell_words() {
        assert_eq!(Verb::RemoveDir.to_string(), "rm -r");
        assert_eq!(Verb::Mkdir.to_string(), "mkdir");
    }
}
