//! Caller identity as returned by the login service.

use serde::{Deserialize, Serialize};

/// Access role attached to a session. `Normal` users go through the
/// per-command permission checks; any other role bypasses them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Role {
    #[default]
    Normal,
    Admin,
}

impl Role {
    pub fn is_elevated(self) -> bool {
        self != Role::Normal
    }
}

/// The identity a session operates under. Obtained from the login flow
/// (or from config in offline mode) and threaded through authorization
/// and every replication message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
    #[serde(default)]
    pub role: Role,
    /// Unique per client process; peers use it to discard echoes of their
    /// own broadcasts.
    pub client_id: String,
    /// Bearer token for the intermediate server. Empty in offline mode.
    #[serde(default)]
    pub token: String,
}

impl Identity {
    /// Identity with a freshly generated client id, used when the config
    /// supplies uid/gid without a login round-trip.
    pub fn offline(uid: u32, gid: u32, role: Role) -> Self {
        Self {
            uid,
            gid,
            role,
            client_id: uuid::Uuid::new_v4().to_string(),
            token: String::new(),
        }
    }
}
