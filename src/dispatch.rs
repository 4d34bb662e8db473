//! Shell command parsing and execution.
//!
//! [`Session`] is one client's view of the shared [`Volume`]: it holds the
//! working directory, the caller's identity, and the replication publisher.
//! Every command follows the same shape: authorize and mutate under a
//! single volume lock, release it, then hand the wire commands to the
//! publisher. Nothing awaits the network while the lock is held.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;
use tokio::sync::Mutex;

use crate::access;
use crate::cache::ContentCache;
use crate::error::{FsError, Result};
use crate::identity::Identity;
use crate::remote::{NullOrigin, Origin, Server};
use crate::replicate::{Command, Publisher};
use crate::vfs::{EntryKind, NodeId, NodeKind, Renamed, Stat, Vfs};

/// Largest file a single upload will accept unless configured otherwise.
pub const DEFAULT_UPLOAD_LIMIT: u64 = 50 * 1024 * 1024;

/// The tree and its content cache, locked as one unit so neither local
/// commands nor replayed peer mutations ever see them out of step.
pub struct Volume {
    pub tree: Vfs,
    pub cache: ContentCache,
}

impl Volume {
    pub fn new(cache_capacity: u64) -> Self {
        Self { tree: Vfs::new(), cache: ContentCache::new(cache_capacity) }
    }
}

const USAGE_LS: &str = "ls [path]";
const USAGE_CD: &str = "cd <directory>";
const USAGE_PWD: &str = "pwd";
const USAGE_CAT: &str = "cat <file>";
const USAGE_STAT: &str = "stat <path>";
const USAGE_MKDIR: &str = "mkdir <directory>...";
const USAGE_TOUCH: &str = "touch <file>...";
const USAGE_RM: &str = "rm [-r] <path>";
const USAGE_CP: &str = "cp [-r] <source> <dest>";
const USAGE_MV: &str = "mv <source> <dest>";
const USAGE_CHMOD: &str = "chmod <octal-mode> <path>";
const USAGE_CHOWN: &str = "chown <uid>:<gid> <path>";
const USAGE_UPLOAD: &str = "upload [-r] <host-path> <dest>";
const USAGE_DOWNLOAD: &str = "download [-r] <source> <host-path>";
const USAGE_MIGRATE: &str = "migrate <source-client> <dest-client>";

/// One parsed shell command. Paths are kept as typed, not yet resolved;
/// resolution happens under the volume lock at execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Ls { path: Option<String> },
    Cd { path: String },
    Pwd,
    Cat { path: String },
    Stat { path: String },
    Mkdir { paths: Vec<String> },
    Touch { paths: Vec<String> },
    Rm { path: String, recursive: bool },
    Cp { source: String, dest: String, recursive: bool },
    Mv { source: String, dest: String },
    Chmod { mode: u32, path: String },
    Chown { uid: u32, gid: u32, path: String },
    Upload { source: String, dest: String, recursive: bool },
    Download { source: String, dest: String, recursive: bool },
    Migrate { source: String, dest: String },
}

impl ShellCommand {
    /// Parse one whitespace-separated command line. Wrong arity reports
    /// the verb's usage string, an unknown verb reports itself.
    pub fn parse(line: &str) -> Result<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, args)) = tokens.split_first() else {
            return Err(FsError::UnknownCommand(String::new()));
        };
        match verb {
            "ls" => match args {
                [] => Ok(Self::Ls { path: None }),
                [path] => Ok(Self::Ls { path: Some(path.to_string()) }),
                _ => Err(FsError::Usage(USAGE_LS)),
            },
            "cd" => match args {
                [path] => Ok(Self::Cd { path: path.to_string() }),
                _ => Err(FsError::Usage(USAGE_CD)),
            },
            "pwd" => match args {
                [] => Ok(Self::Pwd),
                _ => Err(FsError::Usage(USAGE_PWD)),
            },
            "cat" => match args {
                [path] => Ok(Self::Cat { path: path.to_string() }),
                _ => Err(FsError::Usage(USAGE_CAT)),
            },
            "stat" => match args {
                [path] => Ok(Self::Stat { path: path.to_string() }),
                _ => Err(FsError::Usage(USAGE_STAT)),
            },
            "mkdir" => match args {
                [] => Err(FsError::Usage(USAGE_MKDIR)),
                paths => Ok(Self::Mkdir { paths: paths.iter().map(|s| s.to_string()).collect() }),
            },
            "touch" => match args {
                [] => Err(FsError::Usage(USAGE_TOUCH)),
                paths => Ok(Self::Touch { paths: paths.iter().map(|s| s.to_string()).collect() }),
            },
            "rm" => match args {
                ["-r", path] => Ok(Self::Rm { path: path.to_string(), recursive: true }),
                [path] if *path != "-r" => {
                    Ok(Self::Rm { path: path.to_string(), recursive: false })
                }
                _ => Err(FsError::Usage(USAGE_RM)),
            },
            "cp" => match args {
                ["-r", source, dest] => Ok(Self::Cp {
                    source: source.to_string(),
                    dest: dest.to_string(),
                    recursive: true,
                }),
                [source, dest] if *source != "-r" => Ok(Self::Cp {
                    source: source.to_string(),
                    dest: dest.to_string(),
                    recursive: false,
                }),
                _ => Err(FsError::Usage(USAGE_CP)),
            },
            "mv" => match args {
                [source, dest] => {
                    Ok(Self::Mv { source: source.to_string(), dest: dest.to_string() })
                }
                _ => Err(FsError::Usage(USAGE_MV)),
            },
            "chmod" => match args {
                [mode, path] => {
                    let mode =
                        u32::from_str_radix(mode, 8).map_err(|_| FsError::Usage(USAGE_CHMOD))?;
                    Ok(Self::Chmod { mode, path: path.to_string() })
                }
                _ => Err(FsError::Usage(USAGE_CHMOD)),
            },
            "chown" => match args {
                [spec, path] => {
                    let (uid, gid) = spec
                        .split_once(':')
                        .and_then(|(u, g)| Some((u.parse().ok()?, g.parse().ok()?)))
                        .ok_or(FsError::Usage(USAGE_CHOWN))?;
                    Ok(Self::Chown { uid, gid, path: path.to_string() })
                }
                _ => Err(FsError::Usage(USAGE_CHOWN)),
            },
            "upload" => match args {
                ["-r", source, dest] => Ok(Self::Upload {
                    source: source.to_string(),
                    dest: dest.to_string(),
                    recursive: true,
                }),
                [source, dest] if *source != "-r" => Ok(Self::Upload {
                    source: source.to_string(),
                    dest: dest.to_string(),
                    recursive: false,
                }),
                _ => Err(FsError::Usage(USAGE_UPLOAD)),
            },
            "download" => match args {
                ["-r", source, dest] => Ok(Self::Download {
                    source: source.to_string(),
                    dest: dest.to_string(),
                    recursive: true,
                }),
                [source, dest] if *source != "-r" => Ok(Self::Download {
                    source: source.to_string(),
                    dest: dest.to_string(),
                    recursive: false,
                }),
                _ => Err(FsError::Usage(USAGE_DOWNLOAD)),
            },
            "migrate" => match args {
                [source, dest] => {
                    Ok(Self::Migrate { source: source.to_string(), dest: dest.to_string() })
                }
                _ => Err(FsError::Usage(USAGE_MIGRATE)),
            },
            other => Err(FsError::UnknownCommand(other.to_string())),
        }
    }
}

/// What a successful command hands back to the shell for printing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    None,
    Text(String),
    Listing(Vec<(String, EntryKind)>),
    Bytes(Vec<u8>),
}

/// One client's command loop state over a shared volume.
pub struct Session {
    volume: Arc<Mutex<Volume>>,
    publisher: Arc<Publisher>,
    origin: Arc<dyn Origin>,
    server: Option<Arc<Server>>,
    identity: Identity,
    cwd: String,
    max_upload: u64,
    migrate_clients: Vec<String>,
}

impl Session {
    pub fn new(volume: Arc<Mutex<Volume>>, publisher: Arc<Publisher>, identity: Identity) -> Self {
        Self {
            volume,
            publisher,
            origin: Arc::new(NullOrigin),
            server: None,
            identity,
            cwd: "/".to_string(),
            max_upload: DEFAULT_UPLOAD_LIMIT,
            migrate_clients: Vec::new(),
        }
    }

    /// Where evicted file bodies are fetched from again.
    pub fn with_origin(mut self, origin: Arc<dyn Origin>) -> Self {
        self.origin = origin;
        self
    }

    /// Intermediate server used for migrate requests.
    pub fn with_server(mut self, server: Arc<Server>) -> Self {
        self.server = Some(server);
        self
    }

    pub fn with_upload_limit(mut self, limit: u64) -> Self {
        self.max_upload = limit;
        self
    }

    /// Client names `migrate` accepts as source and destination.
    pub fn with_migrate_clients(mut self, clients: Vec<String>) -> Self {
        self.migrate_clients = clients;
        self
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Resolve the working directory, falling back to the root when a
    /// replayed removal has deleted it out from under the session.
    fn cwd_id(&mut self, vol: &Volume) -> NodeId {
        match vol.tree.resolve_dir(&self.cwd, vol.tree.root()) {
            Ok(id) => id,
            Err(_) => {
                if self.cwd != "/" {
                    warn!("working directory {} is gone, moving to /", self.cwd);
                    self.cwd = "/".to_string();
                }
                vol.tree.root()
            }
        }
    }

    /// Run one command to completion. Mutations publish their wire
    /// commands only after the volume lock is back down, and only for
    /// the part of the command that actually applied.
    pub async fn execute(&mut self, cmd: ShellCommand) -> Result<Output> {
        match &cmd {
            ShellCommand::Ls { path } => {
                let volume = Arc::clone(&self.volume);
                let guard = volume.lock().await;
                let cwd = self.cwd_id(&guard);
                access::authorize(&guard.tree, &cmd, cwd, &self.identity)?;
                let target = path.as_deref().unwrap_or(".");
                Ok(Output::Listing(guard.tree.list(target, cwd)?))
            }
            ShellCommand::Cd { path } => {
                let canonical = {
                    let volume = Arc::clone(&self.volume);
                    let guard = volume.lock().await;
                    let cwd = self.cwd_id(&guard);
                    access::authorize(&guard.tree, &cmd, cwd, &self.identity)?;
                    let id = guard.tree.resolve_dir(path, cwd)?;
                    guard.tree.path_of(id).to_string()
                };
                self.cwd = canonical;
                Ok(Output::None)
            }
            ShellCommand::Pwd => {
                let volume = Arc::clone(&self.volume);
                let guard = volume.lock().await;
                self.cwd_id(&guard);
                Ok(Output::Text(self.cwd.clone()))
            }
            ShellCommand::Cat { path } => {
                {
                    let volume = Arc::clone(&self.volume);
                    let guard = volume.lock().await;
                    let cwd = self.cwd_id(&guard);
                    access::authorize(&guard.tree, &cmd, cwd, &self.identity)?;
                }
                Ok(Output::Bytes(self.file_bytes(path).await?))
            }
            ShellCommand::Stat { path } => {
                let stat = {
                    let volume = Arc::clone(&self.volume);
                    let guard = volume.lock().await;
                    let cwd = self.cwd_id(&guard);
                    guard.tree.stat(path, cwd)?
                };
                Ok(Output::Text(render_stat(&stat)))
            }
            ShellCommand::Mkdir { paths } => {
                let mut made: Vec<String> = Vec::new();
                let mut failure = None;
                {
                    let volume = Arc::clone(&self.volume);
                    let mut guard = volume.lock().await;
                    let cwd = self.cwd_id(&guard);
                    access::authorize(&guard.tree, &cmd, cwd, &self.identity)?;
                    for path in paths {
                        match guard.tree.mkdir(path, cwd, self.identity.uid, self.identity.gid) {
                            Ok(id) => made.push(guard.tree.path_of(id).to_string()),
                            Err(err) => {
                                failure = Some(err);
                                break;
                            }
                        }
                    }
                }
                // Publish what applied even when a later path failed, so
                // peers never miss a directory this client now has.
                for path in made {
                    self.publisher.enqueue(Command::mkdir(path, 0o700, &self.identity));
                }
                match failure {
                    Some(err) => Err(err),
                    None => Ok(Output::None),
                }
            }
            ShellCommand::Touch { paths } => {
                let mut made: Vec<String> = Vec::new();
                let mut failure = None;
                {
                    let volume = Arc::clone(&self.volume);
                    let mut guard = volume.lock().await;
                    let cwd = self.cwd_id(&guard);
                    access::authorize(&guard.tree, &cmd, cwd, &self.identity)?;
                    for path in paths {
                        match guard.tree.touch(path, cwd, self.identity.uid, self.identity.gid) {
                            Ok(id) => made.push(guard.tree.path_of(id).to_string()),
                            Err(err) => {
                                failure = Some(err);
                                break;
                            }
                        }
                    }
                }
                for path in made {
                    self.publisher.enqueue(Command::touch(path, 0o644, &self.identity));
                }
                match failure {
                    Some(err) => Err(err),
                    None => Ok(Output::None),
                }
            }
            ShellCommand::Rm { path, recursive } => {
                let removed = {
                    let volume = Arc::clone(&self.volume);
                    let mut guard = volume.lock().await;
                    let cwd = self.cwd_id(&guard);
                    access::authorize(&guard.tree, &cmd, cwd, &self.identity)?;
                    let vol = &mut *guard;
                    if *recursive {
                        let removed = vol.tree.remove_dir(path, cwd)?;
                        vol.cache.forget_subtree(&removed);
                        removed
                    } else {
                        let removed = vol.tree.remove(path, cwd)?;
                        vol.cache.forget(&removed);
                        removed
                    }
                };
                self.publisher.enqueue(if *recursive {
                    Command::remove_dir(removed, &self.identity)
                } else {
                    Command::remove(removed, &self.identity)
                });
                Ok(Output::None)
            }
            ShellCommand::Cp { source, dest, recursive: false } => {
                let copy = {
                    let volume = Arc::clone(&self.volume);
                    let mut guard = volume.lock().await;
                    let cwd = self.cwd_id(&guard);
                    access::authorize(&guard.tree, &cmd, cwd, &self.identity)?;
                    let vol = &mut *guard;
                    let copy = vol.tree.copy_file(
                        source,
                        dest,
                        cwd,
                        self.identity.uid,
                        self.identity.gid,
                    )?;
                    let root = vol.tree.root();
                    if let Ok(id) = vol.tree.resolve(&copy.dest, root) {
                        vol.cache.absorb(&mut vol.tree, id);
                    }
                    copy
                };
                self.publisher.enqueue(Command::copy(
                    copy.source,
                    copy.dest,
                    copy.mode,
                    &self.identity,
                ));
                Ok(Output::None)
            }
            ShellCommand::Cp { source, dest, recursive: true } => {
                let manifest = {
                    let volume = Arc::clone(&self.volume);
                    let mut guard = volume.lock().await;
                    let cwd = self.cwd_id(&guard);
                    access::authorize(&guard.tree, &cmd, cwd, &self.identity)?;
                    let vol = &mut *guard;
                    let manifest = vol.tree.copy_dir(
                        source,
                        dest,
                        cwd,
                        self.identity.uid,
                        self.identity.gid,
                    )?;
                    let root = vol.tree.root();
                    for file in &manifest.files {
                        if let Ok(id) = vol.tree.resolve(&file.dest, root) {
                            vol.cache.absorb(&mut vol.tree, id);
                        }
                    }
                    manifest
                };
                // The wire has no recursive copy; peers get the subtree as
                // one mkdir per directory and one copy per file.
                for (path, mode) in manifest.dirs {
                    self.publisher.enqueue(Command::mkdir(path, mode, &self.identity));
                }
                for file in manifest.files {
                    self.publisher.enqueue(Command::copy(
                        file.source,
                        file.dest,
                        file.mode,
                        &self.identity,
                    ));
                }
                Ok(Output::None)
            }
            ShellCommand::Mv { source, dest } => {
                let renamed = {
                    let volume = Arc::clone(&self.volume);
                    let mut guard = volume.lock().await;
                    let cwd = self.cwd_id(&guard);
                    access::authorize(&guard.tree, &cmd, cwd, &self.identity)?;
                    let vol = &mut *guard;
                    let renamed =
                        vol.tree.rename(source, dest, cwd, self.identity.uid, self.identity.gid)?;
                    let root = vol.tree.root();
                    match &renamed {
                        Renamed::File { copy, removed } => {
                            vol.cache.forget(removed);
                            if let Ok(id) = vol.tree.resolve(&copy.dest, root) {
                                vol.cache.absorb(&mut vol.tree, id);
                            }
                        }
                        Renamed::Dir { copy, removed } => {
                            vol.cache.forget_subtree(removed);
                            for file in &copy.files {
                                if let Ok(id) = vol.tree.resolve(&file.dest, root) {
                                    vol.cache.absorb(&mut vol.tree, id);
                                }
                            }
                        }
                    }
                    renamed
                };
                match renamed {
                    Renamed::File { copy, removed } => {
                        self.publisher.enqueue(Command::copy(
                            copy.source,
                            copy.dest,
                            copy.mode,
                            &self.identity,
                        ));
                        self.publisher.enqueue(Command::remove(removed, &self.identity));
                    }
                    Renamed::Dir { copy, removed } => {
                        for (path, mode) in copy.dirs {
                            self.publisher.enqueue(Command::mkdir(path, mode, &self.identity));
                        }
                        for file in copy.files {
                            self.publisher.enqueue(Command::copy(
                                file.source,
                                file.dest,
                                file.mode,
                                &self.identity,
                            ));
                        }
                        self.publisher.enqueue(Command::remove_dir(removed, &self.identity));
                    }
                }
                Ok(Output::None)
            }
            ShellCommand::Chmod { mode, path } => {
                let canonical = {
                    let volume = Arc::clone(&self.volume);
                    let mut guard = volume.lock().await;
                    let cwd = self.cwd_id(&guard);
                    access::authorize(&guard.tree, &cmd, cwd, &self.identity)?;
                    guard.tree.chmod(path, *mode, cwd)?
                };
                self.publisher.enqueue(Command::chmod(canonical, *mode & 0o777, &self.identity));
                Ok(Output::None)
            }
            ShellCommand::Chown { uid, gid, path } => {
                let canonical = {
                    let volume = Arc::clone(&self.volume);
                    let mut guard = volume.lock().await;
                    let cwd = self.cwd_id(&guard);
                    access::authorize(&guard.tree, &cmd, cwd, &self.identity)?;
                    guard.tree.chown(path, *uid, *gid, cwd)?
                };
                self.publisher.enqueue(Command::chown(canonical, *uid, *gid, &self.identity));
                Ok(Output::None)
            }
            ShellCommand::Upload { source, dest, recursive: false } => {
                let meta = tokio::fs::metadata(source)
                    .await
                    .map_err(|_| FsError::NotFound(source.clone()))?;
                if meta.is_dir() {
                    return Err(FsError::IsDirectory(source.clone()));
                }
                if meta.len() > self.max_upload {
                    return Err(FsError::FileTooLarge { size: meta.len(), limit: self.max_upload });
                }
                let content = tokio::fs::read(source).await?;
                let mode = host_mode(&meta);
                let canonical = {
                    let volume = Arc::clone(&self.volume);
                    let mut guard = volume.lock().await;
                    let cwd = self.cwd_id(&guard);
                    access::authorize(&guard.tree, &cmd, cwd, &self.identity)?;
                    let vol = &mut *guard;
                    vol.cache.fits(content.len() as u64)?;
                    let id = vol.tree.create_file(
                        dest,
                        cwd,
                        content.clone(),
                        mode,
                        self.identity.uid,
                        self.identity.gid,
                    )?;
                    vol.cache.track(&mut vol.tree, id)?;
                    vol.tree.path_of(id).to_string()
                };
                self.publisher.enqueue(Command::upload(canonical, content, mode, &self.identity));
                Ok(Output::None)
            }
            ShellCommand::Upload { source, dest, recursive: true } => {
                let entries = collect_host_tree(PathBuf::from(source)).await?;
                let mut commands: Vec<Command> = Vec::new();
                let mut failure = None;
                {
                    let volume = Arc::clone(&self.volume);
                    let mut guard = volume.lock().await;
                    let cwd = self.cwd_id(&guard);
                    access::authorize(&guard.tree, &cmd, cwd, &self.identity)?;
                    let vol = &mut *guard;
                    let dest_id = vol.tree.resolve_dir(dest, cwd)?;
                    let base = vol.tree.path_of(dest_id).to_string();
                    let root = vol.tree.root();
                    for entry in entries {
                        let target = join_under(&base, &entry.rel);
                        let applied = upload_entry(
                            vol,
                            target,
                            entry.kind,
                            entry.mode,
                            &self.identity,
                            root,
                            self.max_upload,
                        );
                        match applied {
                            Ok(cmd) => commands.push(cmd),
                            Err(err) => {
                                failure = Some(err);
                                break;
                            }
                        }
                    }
                }
                for cmd in commands {
                    self.publisher.enqueue(cmd);
                }
                match failure {
                    Some(err) => Err(err),
                    None => Ok(Output::None),
                }
            }
            ShellCommand::Download { source, dest, recursive: false } => {
                {
                    let volume = Arc::clone(&self.volume);
                    let guard = volume.lock().await;
                    let cwd = self.cwd_id(&guard);
                    access::authorize(&guard.tree, &cmd, cwd, &self.identity)?;
                }
                let bytes = self.file_bytes(source).await?;
                if let Some(parent) =
                    Path::new(dest).parent().filter(|p| !p.as_os_str().is_empty())
                {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(dest, &bytes).await?;
                Ok(Output::Text(format!("{} bytes written to {dest}", bytes.len())))
            }
            ShellCommand::Download { source, dest, recursive: true } => {
                let (dirs, files) = {
                    let volume = Arc::clone(&self.volume);
                    let guard = volume.lock().await;
                    let cwd = self.cwd_id(&guard);
                    access::authorize(&guard.tree, &cmd, cwd, &self.identity)?;
                    let id = guard.tree.resolve_dir(source, cwd)?;
                    collect_vfs_tree(&guard.tree, id)
                };
                tokio::fs::create_dir_all(dest).await?;
                for rel in &dirs {
                    tokio::fs::create_dir_all(Path::new(dest).join(rel)).await?;
                }
                let count = files.len();
                for (vfs_path, rel) in files {
                    let bytes = self.file_bytes(&vfs_path).await?;
                    tokio::fs::write(Path::new(dest).join(rel), &bytes).await?;
                }
                Ok(Output::Text(format!("{count} file(s) written to {dest}")))
            }
            ShellCommand::Migrate { source, dest } => {
                {
                    let volume = Arc::clone(&self.volume);
                    let guard = volume.lock().await;
                    let cwd = self.cwd_id(&guard);
                    access::authorize(&guard.tree, &cmd, cwd, &self.identity)?;
                }
                let supported = |name: &str| self.migrate_clients.iter().any(|c| c == name);
                if !supported(source) {
                    return Err(FsError::Migrate("source client is not supported"));
                }
                if !supported(dest) {
                    return Err(FsError::Migrate("destination client is not supported"));
                }
                if source == dest {
                    return Err(FsError::Migrate("source and destination are the same client"));
                }
                let server = self
                    .server
                    .as_ref()
                    .ok_or_else(|| FsError::Remote("no intermediate server configured".into()))?;
                Ok(Output::Text(server.migrate(source, dest).await?))
            }
        }
    }

    /// Bytes of one file. A resident body is served from the tree and
    /// promoted in the cache; an evicted one is fetched from the origin
    /// and, when it fits, made resident again.
    async fn file_bytes(&mut self, path: &str) -> Result<Vec<u8>> {
        let canonical = {
            let volume = Arc::clone(&self.volume);
            let mut guard = volume.lock().await;
            let cwd = self.cwd_id(&guard);
            let vol = &mut *guard;
            let id = vol.tree.resolve(path, cwd)?;
            let node = vol.tree.node(id);
            let NodeKind::File { content, size } = &node.kind else {
                return Err(FsError::IsDirectory(node.path.clone()));
            };
            if (content.len() as u64) >= *size {
                let bytes = content.clone();
                let key = node.path.clone();
                vol.cache.get(&key);
                return Ok(bytes);
            }
            node.path.clone()
        };
        let bytes = self.origin.fetch(&canonical).await?;
        {
            let volume = Arc::clone(&self.volume);
            let mut guard = volume.lock().await;
            let vol = &mut *guard;
            let root = vol.tree.root();
            if let Ok(id) = vol.tree.resolve(&canonical, root) {
                if vol.tree.node(id).is_evicted() && vol.cache.fits(bytes.len() as u64).is_ok() {
                    let _ = vol.cache.insert(&mut vol.tree, id, bytes.clone());
                }
            }
        }
        Ok(bytes)
    }
}

fn render_stat(stat: &Stat) -> String {
    let modified: chrono::DateTime<chrono::Local> = stat.modified.into();
    format!(
        "{} {}:{} {} ({} resident) {} {}",
        stat.mode_string(),
        stat.uid,
        stat.gid,
        stat.size,
        stat.resident,
        modified.format("%Y-%m-%d %H:%M:%S"),
        stat.path,
    )
}

/// Apply one host entry inside a recursive upload and describe it for
/// the wire.
fn upload_entry(
    vol: &mut Volume,
    target: String,
    kind: HostKind,
    mode: u32,
    who: &Identity,
    root: NodeId,
    limit: u64,
) -> Result<Command> {
    match kind {
        HostKind::Dir => {
            vol.tree.mkdir_with(&target, root, mode, who.uid, who.gid)?;
            Ok(Command::mkdir(target, mode, who))
        }
        HostKind::File(content) => {
            let size = content.len() as u64;
            if size > limit {
                return Err(FsError::FileTooLarge { size, limit });
            }
            vol.cache.fits(size)?;
            let id = vol.tree.create_file(&target, root, content.clone(), mode, who.uid, who.gid)?;
            vol.cache.track(&mut vol.tree, id)?;
            Ok(Command::upload(target, content, mode, who))
        }
    }
}

struct HostEntry {
    rel: String,
    mode: u32,
    kind: HostKind,
}

enum HostKind {
    Dir,
    File(Vec<u8>),
}

#[cfg(unix)]
fn host_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn host_mode(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}

fn join_under(base: &str, rel: &str) -> String {
    if base == "/" { format!("/{rel}") } else { format!("{base}/{rel}") }
}

/// Read a host directory into a flat list, parents before children and
/// siblings in name order. Runs on the blocking pool since it touches
/// the real filesystem.
async fn collect_host_tree(root: PathBuf) -> Result<Vec<HostEntry>> {
    tokio::task::spawn_blocking(move || {
        let meta = std::fs::metadata(&root)
            .map_err(|_| FsError::NotFound(root.display().to_string()))?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory(root.display().to_string()));
        }
        let mut out = Vec::new();
        walk_host(&root, &root, &mut out)?;
        Ok(out)
    })
    .await
    .map_err(|err| FsError::Io(std::io::Error::other(err)))?
}

fn walk_host(base: &Path, dir: &Path, out: &mut Vec<HostEntry>) -> Result<()> {
    let mut entries: Vec<std::fs::DirEntry> =
        std::fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        let meta = entry.metadata()?;
        let rel = path
            .strip_prefix(base)
            .expect("entry under walk base")
            .to_string_lossy()
            .into_owned();
        if meta.is_dir() {
            out.push(HostEntry { rel, mode: host_mode(&meta), kind: HostKind::Dir });
            walk_host(base, &path, out)?;
        } else {
            let content = std::fs::read(&path)?;
            out.push(HostEntry { rel, mode: host_mode(&meta), kind: HostKind::File(content) });
        }
    }
    Ok(())
}

/// Relative directory and file paths under one vfs node, for writing a
/// subtree out to the host. Files carry their canonical vfs path so the
/// body can be fetched after the lock is released.
fn collect_vfs_tree(fs: &Vfs, top: NodeId) -> (Vec<String>, Vec<(String, String)>) {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let mut stack: Vec<(NodeId, String)> = vec![(top, String::new())];
    while let Some((id, rel)) = stack.pop() {
        let node = fs.node(id);
        match &node.kind {
            NodeKind::Directory { children } => {
                if !rel.is_empty() {
                    dirs.push(rel.clone());
                }
                let mut entries: Vec<(&String, &NodeId)> = children.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                for (name, child) in entries {
                    let child_rel = if rel.is_empty() {
                        name.clone()
                    } else {
                        format!("{rel}/{name}")
                    };
                    stack.push((*child, child_rel));
                }
            }
            NodeKind::File { .. } => files.push((node.path.clone(), rel)),
        }
    }
    dirs.sort();
    (dirs, files)
}
