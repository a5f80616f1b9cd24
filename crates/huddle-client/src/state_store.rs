//! Client state file (`~/.huddle/client-state.json`).
//!
//! Remembers the last claimed name and when its session was last seen, so a
//! name abandoned by a crashed client can be released on the next start.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ClientError;

/// Persisted client state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientState {
    /// Name claimed by the previous session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_username: Option<String>,
    /// When that session was last known alive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_session_time: Option<DateTime<Utc>>,
}

impl ClientState {
    /// The remembered name if its session is older than `stale_after`.
    pub fn stale_name(&self, now: DateTime<Utc>, stale_after: Duration) -> Option<&str> {
        let name = self.last_username.as_deref()?;
        let seen = self.last_session_time?;
        let age = now.signed_duration_since(seen).to_std().ok()?;
        (age > stale_after).then_some(name)
    }
}

/// File-backed [`ClientState`].
#[derive(Clone, Debug)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load state; a missing or unreadable file yields the default.
    pub fn load(&self) -> ClientState {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ClientState::default(),
            Err(e) => {
                warn!(path = %self.path.display(), "failed to read client state: {e}");
                return ClientState::default();
            }
        };
        serde_json::from_str(&data).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), "failed to parse client state: {e}");
            ClientState::default()
        })
    }

    /// Write state, creating parent directories if needed.
    pub fn save(&self, state: &ClientState) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Remember `name` as the live session at `now`.
    pub fn record_session(&self, name: &str, now: DateTime<Utc>) -> Result<(), ClientError> {
        self.save(&ClientState {
            last_username: Some(name.to_string()),
            last_session_time: Some(now),
        })
    }

    /// Forget the remembered session.
    pub fn clear(&self) -> Result<(), ClientError> {
        self.save(&ClientState::default())
    }
}
