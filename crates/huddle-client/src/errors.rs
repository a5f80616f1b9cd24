//! Client error types.

use huddle_core::HubError;

/// Errors raised by the registration API, the state file, and the driver.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The hub refused a name because it is held by an online user.
    #[error("name \"{name}\" is already taken by an active user")]
    NameTaken {
        /// The contested name.
        name: String,
    },

    /// The hub rejected a request.
    #[error("hub rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Message from the response body.
        message: String,
    },

    /// A nickname failed local validation.
    #[error("invalid nickname: {0}")]
    InvalidName(&'static str),

    /// The server URL could not be turned into a WebSocket URL.
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),

    /// A protocol-level failure reported by the hub.
    #[error(transparent)]
    Hub(#[from] HubError),

    /// The driver task is gone.
    #[error("client driver stopped")]
    DriverStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_taken_display() {
        let err = ClientError::NameTaken {
            name: "alice".into(),
        };
        assert_eq!(err.to_string(), "name \"alice\" is already taken by an active user");
    }

    #[test]
    fn rejected_display() {
        let err = ClientError::Rejected {
            status: 400,
            message: "Name is required!".into(),
        };
        assert_eq!(err.to_string(), "hub rejected request (400): Name is required!");
    }

    #[test]
    fn hub_error_is_transparent() {
        let err = ClientError::from(HubError::MissingName);
        assert_eq!(err.to_string(), "Name is required!");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(ClientError::from(io_err).to_string().contains("gone"));
    }
}
