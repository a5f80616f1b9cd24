//! Error taxonomy for the hub.
//!
//! Every variant is scoped to one request or one connection; none of them is
//! fatal to the hub process. [`HubError::code`] gives the stable
//! machine-readable code carried in `error` frames and logs.

use thiserror::Error;

use crate::ids::{ConnectionId, UserId};

/// Errors raised by registry, multiplexer, and liveness operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// A claim or removal arrived without a usable name.
    #[error("Name is required!")]
    MissingName,

    /// The name is held by a user whose connection is still open.
    #[error("This name is already taken by an active user!")]
    NameTaken {
        /// The contested name.
        name: String,
    },

    /// An inbound duplex payload could not be decoded.
    #[error("malformed payload: {0}")]
    Parse(#[from] serde_json::Error),

    /// Socket-level failure on one connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// A connection missed a liveness probe.
    #[error("connection {connection_id} missed a liveness probe")]
    LivenessTimeout {
        /// The pruned connection.
        connection_id: ConnectionId,
    },

    /// A connection announced an identity the registry never issued.
    #[error("identity {user_id} was not issued by this hub: {reason}")]
    IdentityRejected {
        /// The announced id.
        user_id: UserId,
        /// Why the attach failed.
        reason: &'static str,
    },
}

impl HubError {
    /// Wire code of [`HubError::IdentityRejected`].
    pub const IDENTITY_REJECTED: &'static str = "identity_rejected";

    /// Stable wire code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingName => "missing_field",
            Self::NameTaken { .. } => "conflict",
            Self::Parse(_) => "parse_error",
            Self::Transport(_) => "transport_error",
            Self::LivenessTimeout { .. } => "liveness_timeout",
            Self::IdentityRejected { .. } => Self::IDENTITY_REJECTED,
        }
    }
}
