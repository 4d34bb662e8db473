//! YAML configuration for the client binary.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::identity::Role;

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Intermediate server; absent means the client runs offline and
    /// evicted file bodies cannot be refetched.
    pub server: Option<ServerConfig>,
    /// Cloud client names `migrate` accepts.
    #[serde(default)]
    pub migrate_clients: Vec<String>,
    /// Largest single upload, in megabytes.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
    /// Snapshot archive to restore on startup.
    pub backup: Option<BackupConfig>,
    /// Bus topic replication commands are published on.
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Byte budget for resident file content.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    /// Identity to use when no server is configured for login.
    pub offline_identity: Option<OfflineIdentity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    // ip:port of the intermediate server
    pub addr: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    /// Directory the archive is read from.
    pub local_dir: String,
    /// Archive file name inside `local_dir`.
    pub archive: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct OfflineIdentity {
    pub uid: u32,
    pub gid: u32,
    #[serde(default)]
    pub role: Role,
}

fn default_max_upload_mb() -> u64 {
    50
}

fn default_topic() -> String {
    "command-log".to_string()
}

fn default_cache_capacity() -> u64 {
    100 * 1024 * 1024
}

impl Config {
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: None,
            migrate_clients: Vec::new(),
            max_upload_mb: default_max_upload_mb(),
            backup: None,
            topic: default_topic(),
            cache_capacity: default_cache_capacity(),
            offline_identity: None,
        }
    }
}

pub fn load_config(path: &str) -> Result<Config> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read config from {path}"))?;
    let cfg: Config = serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    Ok(cfg)
}
