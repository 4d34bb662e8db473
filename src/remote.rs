//! HTTP edge toward the intermediate server.
//!
//! The server is the origin of record for file bodies: evicted content
//! is re-fetched from here. It also issues identities at login, runs
//! migrations between cloud backends, and answers the liveness probe the
//! health monitor polls. Everything speaks JSON under `/api/v1`, except
//! `/health`, which is a bare endpoint.

use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::{FsError, Result};
use crate::identity::{Identity, Role};

const API_PREFIX: &str = "/api/v1";
const HEALTH_PROBE_INTERVAL: Duration = Duration::from_secs(5);
const HEALTH_RECOVERY_INTERVAL: Duration = Duration::from_secs(3);

/// Source of authoritative file bodies. `cat` and `download` go through
/// this when a file's content is not resident.
#[async_trait]
pub trait Origin: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>>;
}

/// Origin for sessions running without a server. Every fetch fails, so
/// an evicted file stays unreadable until re-uploaded.
pub struct NullOrigin;

#[async_trait]
impl Origin for NullOrigin {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        Err(FsError::Remote(format!("no origin server configured, cannot fetch {path}")))
    }
}

/// Client for one intermediate server.
#[derive(Clone)]
pub struct Server {
    base: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
    data: LoginData,
}

#[derive(Deserialize)]
struct LoginData {
    uid: u32,
    gid: u32,
    role: String,
    client_id: String,
}

#[derive(Deserialize)]
struct FileObject {
    data: Vec<u8>,
}

#[derive(Deserialize)]
struct MigrateResponse {
    message: String,
}

impl Server {
    /// `addr` is `host:port`; the scheme is fixed.
    pub fn new(addr: &str) -> Self {
        Self {
            base: format!("http://{addr}"),
            token: String::new(),
            client: reqwest::Client::new(),
        }
    }

    /// Attach the bearer token handed out by `login`.
    pub fn authenticated(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    fn url(&self, route: &str) -> String {
        format!("{}{API_PREFIX}{route}", self.base)
    }

    /// Exchange credentials for a session identity.
    pub async fn login(&self, username: &str, password: &str) -> Result<Identity> {
        let resp = self
            .client
            .post(self.url("/user/login"))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(|e| FsError::Remote(e.to_string()))?
            .error_for_status()
            .map_err(|_| FsError::Remote("username or password is invalid".into()))?;
        let body: LoginResponse =
            resp.json().await.map_err(|e| FsError::Remote(e.to_string()))?;
        let role = match body.data.role.as_str() {
            "Normal" => Role::Normal,
            _ => Role::Admin,
        };
        Ok(Identity {
            uid: body.data.uid,
            gid: body.data.gid,
            role,
            client_id: body.data.client_id,
            token: body.token,
        })
    }

    /// Ask the server to move data between two named cloud backends.
    /// Validation of the client names happens at the dispatch layer.
    pub async fn migrate(&self, source: &str, dest: &str) -> Result<String> {
        let resp = self
            .client
            .post(self.url("/migrate"))
            .header("token", &self.token)
            .form(&[("clientSource", source), ("clientDest", dest)])
            .send()
            .await
            .map_err(|e| FsError::Remote(e.to_string()))?
            .error_for_status()
            .map_err(|e| FsError::Remote(e.to_string()))?;
        let body: MigrateResponse =
            resp.json().await.map_err(|e| FsError::Remote(e.to_string()))?;
        Ok(body.message)
    }

    async fn health(&self) -> bool {
        match self.client.get(format!("{}/health", self.base)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Origin for Server {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(self.url("/file/object"))
            .query(&[("filename", path)])
            .header("token", &self.token)
            .send()
            .await
            .map_err(|e| FsError::Remote(e.to_string()))?
            .error_for_status()
            .map_err(|e| FsError::Remote(e.to_string()))?;
        let body: FileObject = resp.json().await.map_err(|e| FsError::Remote(e.to_string()))?;
        Ok(body.data)
    }
}

/// Poll the server's liveness endpoint until cancelled: every 5s while
/// healthy, every 3s while degraded. Purely advisory; commands keep
/// running either way.
pub fn spawn_health_monitor(
    server: Server,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut probe = tokio::time::interval(HEALTH_PROBE_INTERVAL);
        probe.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = probe.tick() => {}
            }
            if server.health().await {
                continue;
            }
            warn!("intermediate server is down, your changes may not be replicated");
            let mut recovery = tokio::time::interval(HEALTH_RECOVERY_INTERVAL);
            recovery.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = recovery.tick() => {}
                }
                if server.health().await {
                    info!("intermediate server recovered");
                    break;
                }
            }
        }
    })
}
