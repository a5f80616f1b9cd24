//! Request/response channel: claiming and releasing display names.

use std::future::Future;
use std::time::Duration;

use huddle_core::User;
use huddle_core::protocol::{ApiStatus, ClaimResponse, NameRequest, StatusResponse};
use tracing::{debug, info, instrument};

use crate::errors::ClientError;

/// Pause between a forced removal and the retried claim.
pub const TAKEOVER_PAUSE: Duration = Duration::from_secs(1);

/// Shortest accepted nickname, in characters.
pub const MIN_NICKNAME_CHARS: usize = 2;
/// Longest accepted nickname, in characters.
pub const MAX_NICKNAME_CHARS: usize = 20;

/// Trim and length-check a nickname before it is sent to the hub.
pub fn validate_nickname(name: &str) -> Result<&str, ClientError> {
    let name = name.trim();
    let len = name.chars().count();
    if len == 0 {
        Err(ClientError::InvalidName("a nickname is required"))
    } else if len < MIN_NICKNAME_CHARS {
        Err(ClientError::InvalidName("must be at least 2 characters"))
    } else if len > MAX_NICKNAME_CHARS {
        Err(ClientError::InvalidName("must be at most 20 characters"))
    } else {
        Ok(name)
    }
}

/// HTTP client for the hub's name endpoints.
#[derive(Clone, Debug)]
pub struct RegistrationClient {
    http: reqwest::Client,
    base_url: String,
}

impl RegistrationClient {
    /// Client for a hub at `base_url` (e.g. `http://localhost:3000`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    /// The HTTP base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The duplex endpoint derived from the base URL.
    pub fn ws_url(&self) -> Result<String, ClientError> {
        ws_url_for(&self.base_url)
    }

    /// Claim `name`. A name held by an online user yields
    /// [`ClientError::NameTaken`].
    #[instrument(skip(self))]
    pub async fn claim(&self, name: &str) -> Result<User, ClientError> {
        let resp = self
            .http
            .post(format!("{}/new-user", self.base_url))
            .json(&NameRequest::new(name))
            .send()
            .await?;

        let status = resp.status().as_u16();
        match status {
            200 => {
                let body: ClaimResponse = resp.json().await?;
                info!(user_id = %body.user.id, name = %body.user.name, "name claimed");
                Ok(body.user)
            }
            409 => Err(ClientError::NameTaken {
                name: name.to_string(),
            }),
            _ => {
                let message = error_message(resp).await;
                Err(ClientError::Rejected { status, message })
            }
        }
    }

    /// Remove the row holding `name` regardless of liveness.
    ///
    /// Returns `false` when the hub had no such user.
    #[instrument(skip(self))]
    pub async fn force_remove(&self, name: &str) -> Result<bool, ClientError> {
        let resp = self
            .http
            .post(format!("{}/force-remove-user", self.base_url))
            .json(&NameRequest::new(name))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let message = error_message(resp).await;
            return Err(ClientError::Rejected { status, message });
        }
        let body: StatusResponse = resp.json().await?;
        debug!(message = %body.message, "force-remove answered");
        Ok(body.status == ApiStatus::Ok)
    }

    /// Claim `name`, and if it is taken ask `confirm` whether to take it
    /// over. On confirmation the holder is force-removed and the claim is
    /// retried once after [`TAKEOVER_PAUSE`].
    pub async fn claim_with_takeover<F, Fut>(&self, name: &str, confirm: F) -> Result<User, ClientError>
    where
        F: FnOnce(&str) -> Fut,
        Fut: Future<Output = bool>,
    {
        match self.claim(name).await {
            Err(ClientError::NameTaken { name }) => {
                if !confirm(&name).await {
                    return Err(ClientError::NameTaken { name });
                }
                let removed = self.force_remove(&name).await?;
                info!(name, removed, "taking over name");
                tokio::time::sleep(TAKEOVER_PAUSE).await;
                self.claim(&name).await
            }
            other => other,
        }
    }
}

/// Map `http://` → `ws://` and `https://` → `wss://`, then append `/ws`.
pub fn ws_url_for(base_url: &str) -> Result<String, ClientError> {
    let base = base_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        return Err(ClientError::InvalidUrl(base_url.to_string()));
    };
    Ok(format!("{ws}/ws"))
}

async fn error_message(resp: reqwest::Response) -> String {
    let text = resp.text().await.unwrap_or_default();
    serde_json::from_str::<StatusResponse>(&text).map_or(text, |body| body.message)
}
