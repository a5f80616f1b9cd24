//! Wire formats.
//!
//! Two channels carry JSON:
//!
//! - the request/response channel (`POST /new-user`, `POST /force-remove-user`)
//!   used once per session to claim a name
//! - the duplex channel, where clients send [`ClientMessage`] frames and the
//!   hub answers with roster arrays, `pong`, `error`, or a verbatim echo of a
//!   chat `send`
//!
//! Inbound duplex frames are decoded loosely ([`InboundMessage`]) because a
//! `send` payload has to be echoed byte-for-byte and unknown types must not
//! break the connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::HubError;
use crate::ids::UserId;

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// A claimed identity as stored by the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Opaque unique token.
    pub id: UserId,
    /// Display name, unique among active users.
    pub name: String,
    /// Claim time in Unix epoch milliseconds.
    pub joined_at: i64,
}

impl User {
    /// Create a user with a fresh id stamped at the current time.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            joined_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// The `{id, name}` pair clients embed in duplex payloads.
    #[must_use]
    pub fn to_ref(&self) -> UserRef {
        UserRef {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Identity as announced inside a duplex payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    /// Id previously issued by a claim.
    pub id: UserId,
    /// Display name the client believes it holds.
    #[serde(default)]
    pub name: String,
}

/// One row of a roster snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    /// User id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Whether a live connection is bound to this user.
    pub is_online: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/response channel
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `POST /new-user` and `POST /force-remove-user`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NameRequest {
    /// Requested display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl NameRequest {
    /// Build a request for `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// The trimmed name, or [`HubError::MissingName`] when absent or blank.
    pub fn validated_name(&self) -> Result<&str, HubError> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or(HubError::MissingName)
    }
}

/// `status` field of every HTTP response body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    /// Request succeeded.
    Ok,
    /// Request was rejected.
    Error,
}

/// Successful claim response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResponse {
    /// Always [`ApiStatus::Ok`].
    pub status: ApiStatus,
    /// The freshly created registry row.
    pub user: User,
}

/// `{status, message}` body used by errors and forced removal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Outcome.
    pub status: ApiStatus,
    /// Human-readable detail.
    pub message: String,
}

impl StatusResponse {
    /// An `ok` body.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: ApiStatus::Ok,
            message: message.into(),
        }
    }

    /// An `error` body.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ApiStatus::Error,
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Duplex channel: client → server
// ─────────────────────────────────────────────────────────────────────────────

/// Recognised values of the inbound `type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Application-level liveness probe.
    Ping,
    /// Identity announcement sent right after the socket opens.
    Join,
    /// Chat payload to fan out.
    Send,
    /// Deliberate departure.
    Exit,
    /// Roster query.
    GetUsers,
    /// Anything else.
    Unknown,
}

impl MessageKind {
    /// Map a wire `type` string.
    #[must_use]
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "ping" => Self::Ping,
            "join" => Self::Join,
            "send" => Self::Send,
            "exit" => Self::Exit,
            "get_users" => Self::GetUsers,
            _ => Self::Unknown,
        }
    }
}

/// Loosely decoded inbound duplex payload.
#[derive(Clone, Debug, Deserialize)]
pub struct InboundMessage {
    /// Raw `type` field.
    #[serde(rename = "type")]
    pub kind: String,
    /// Identity carried by the payload, if it has a usable string `id`.
    /// Any other shape decodes as `None` so the frame still routes on `type`.
    #[serde(default, deserialize_with = "lenient_user")]
    pub user: Option<UserRef>,
    /// Chat body; only meaningful for `send`.
    #[serde(default)]
    pub message: Option<Value>,
}

fn lenient_user<'de, D>(deserializer: D) -> Result<Option<UserRef>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

impl InboundMessage {
    /// Decode a text or binary frame body.
    pub fn parse(raw: &[u8]) -> Result<Self, HubError> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// The recognised message kind.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        MessageKind::from_wire(&self.kind)
    }
}

/// Frames a client sends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Application probe.
    Ping,
    /// Announce the claimed identity on a fresh connection.
    Join {
        /// Identity issued by the claim.
        user: UserRef,
    },
    /// Broadcast a chat line.
    Send {
        /// Chat body.
        message: String,
        /// Author.
        user: UserRef,
    },
    /// Leave the hub.
    Exit {
        /// Departing identity.
        user: UserRef,
    },
    /// Ask for the roster.
    GetUsers,
}

impl ClientMessage {
    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> Result<String, HubError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Duplex channel: server → client
// ─────────────────────────────────────────────────────────────────────────────

/// Typed frames the hub originates (roster arrays and chat echoes are
/// serialized separately).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to an application `ping`.
    Pong,
    /// A per-connection failure notice.
    Error {
        /// Stable code from [`HubError::code`].
        code: String,
        /// Human-readable detail.
        message: String,
    },
}

impl From<&HubError> for ServerMessage {
    fn from(err: &HubError) -> Self {
        Self::Error {
            code: err.code().to_owned(),
            message: err.to_string(),
        }
    }
}

/// A chat line as echoed by the hub.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ChatMessage {
    /// Chat body.
    #[serde(default)]
    pub message: String,
    /// Author, when the sender included one.
    #[serde(default)]
    pub user: Option<UserRef>,
}

/// Any frame a client may receive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerFrame {
    /// Roster snapshot, solicited or broadcast.
    Roster(Vec<RosterEntry>),
    /// Reply to an application ping.
    Pong,
    /// Echoed chat line.
    Chat(ChatMessage),
    /// Error notice.
    Error {
        /// Stable code.
        code: String,
        /// Detail.
        message: String,
    },
    /// A frame type this client does not handle.
    Other(String),
}

impl ServerFrame {
    /// Decode a frame received from the hub.
    pub fn parse(raw: &str) -> Result<Self, HubError> {
        let value: Value = serde_json::from_str(raw)?;
        if value.is_array() {
            return Ok(Self::Roster(serde_json::from_value(value)?));
        }
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        match kind.as_str() {
            "pong" => Ok(Self::Pong),
            "send" => Ok(Self::Chat(serde_json::from_value(value)?)),
            "error" => match serde_json::from_value::<ServerMessage>(value)? {
                ServerMessage::Error { code, message } => Ok(Self::Error { code, message }),
                ServerMessage::Pong => Ok(Self::Pong),
            },
            _ => Ok(Self::Other(kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn user_serializes_camel_case() {
        let user = User {
            id: UserId::from("u1"),
            name: "alice".into(),
            joined_at: 1_700_000_000_000,
        };
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(
            value,
            json!({"id": "u1", "name": "alice", "joinedAt": 1_700_000_000_000_i64})
        );
    }

    #[test]
    fn new_user_gets_fresh_id_and_timestamp() {
        let a = User::new("alice");
        let b = User::new("alice");
        assert_ne!(a.id, b.id);
        assert!(a.joined_at > 0);
    }

    #[test]
    fn roster_entry_uses_is_online() {
        let entry = RosterEntry {
            id: UserId::from("u1"),
            name: "bob".into(),
            is_online: true,
        };
        let value = serde_json::to_value(entry).unwrap();
        assert_eq!(value["isOnline"], true);
    }

    #[test]
    fn name_request_validation() {
        assert_matches!(
            NameRequest::default().validated_name(),
            Err(HubError::MissingName)
        );
        assert_matches!(
            NameRequest::new("   ").validated_name(),
            Err(HubError::MissingName)
        );
        assert_eq!(NameRequest::new("  alice ").validated_name().unwrap(), "alice");
    }

    #[test]
    fn status_response_shape() {
        let value = serde_json::to_value(StatusResponse::error("User not found")).unwrap();
        assert_eq!(value, json!({"status": "error", "message": "User not found"}));
    }

    #[test]
    fn inbound_send_with_user() {
        let raw = br#"{"type":"send","message":"hi","user":{"id":"u1","name":"alice","joinedAt":1}}"#;
        let msg = InboundMessage::parse(raw).unwrap();
        assert_eq!(msg.kind(), MessageKind::Send);
        assert_eq!(msg.user.unwrap().id, UserId::from("u1"));
        assert_eq!(msg.message, Some(json!("hi")));
    }

    #[test]
    fn inbound_user_without_usable_id_is_dropped() {
        for raw in [
            br#"{"type":"send","message":"hi","user":{"name":"alice"}}"#.as_slice(),
            br#"{"type":"send","message":"hi","user":"alice"}"#.as_slice(),
            br#"{"type":"send","message":"hi","user":{"id":7,"name":"alice"}}"#.as_slice(),
            br#"{"type":"send","message":"hi","user":null}"#.as_slice(),
        ] {
            let msg = InboundMessage::parse(raw).unwrap();
            assert_eq!(msg.kind(), MessageKind::Send);
            assert!(msg.user.is_none());
        }
    }

    #[test]
    fn inbound_unknown_type_is_not_an_error() {
        let msg = InboundMessage::parse(br#"{"type":"typing"}"#).unwrap();
        assert_eq!(msg.kind(), MessageKind::Unknown);
        assert!(msg.user.is_none());
    }

    #[test]
    fn inbound_malformed_is_parse_error() {
        assert_matches!(InboundMessage::parse(b"not json"), Err(HubError::Parse(_)));
        assert_matches!(InboundMessage::parse(br#"{"message":"x"}"#), Err(HubError::Parse(_)));
    }

    #[test]
    fn client_messages_are_type_tagged() {
        let user = UserRef {
            id: UserId::from("u1"),
            name: "alice".into(),
        };
        let exit = ClientMessage::Exit { user }.to_json().unwrap();
        let value: Value = serde_json::from_str(&exit).unwrap();
        assert_eq!(value["type"], "exit");
        assert_eq!(value["user"]["name"], "alice");

        let get = ClientMessage::GetUsers.to_json().unwrap();
        assert_eq!(get, r#"{"type":"get_users"}"#);
    }

    #[test]
    fn server_frame_roster() {
        let frame = ServerFrame::parse(r#"[{"id":"u1","name":"a","isOnline":false}]"#).unwrap();
        assert_matches!(frame, ServerFrame::Roster(rows) if rows.len() == 1 && !rows[0].is_online);
    }

    #[test]
    fn server_frame_pong_chat_error() {
        assert_eq!(ServerFrame::parse(r#"{"type":"pong"}"#).unwrap(), ServerFrame::Pong);

        let chat = ServerFrame::parse(r#"{"type":"send","message":"yo","user":{"id":"u2","name":"b"}}"#)
            .unwrap();
        assert_matches!(chat, ServerFrame::Chat(ChatMessage { ref message, .. }) if message == "yo");

        let err = ServerFrame::parse(r#"{"type":"error","code":"identity_rejected","message":"no"}"#)
            .unwrap();
        assert_matches!(err, ServerFrame::Error { ref code, .. } if code == "identity_rejected");

        assert_eq!(
            ServerFrame::parse(r#"{"type":"user_joined"}"#).unwrap(),
            ServerFrame::Other("user_joined".into())
        );
    }

    #[test]
    fn server_message_from_hub_error() {
        let msg = ServerMessage::from(&HubError::MissingName);
        let value = serde_json::to_value(msg).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "missing_field");
    }
}
