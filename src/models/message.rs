use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;
use utoipa::ToSchema;

/// Message types carried on the document socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Document content snapshot or delta; replaces the cache, marked dirty
    Update,
    /// Per-user cursor position; fanout only, never cached
    Cursor,
    /// Reserved, not emitted by the current protocol
    Join,
    /// Reserved, not emitted by the current protocol
    Leave,
    /// Server-sent list of users currently in the room
    PresenceUpdate,
    /// Server-sent document title, delivered once on join
    Metadata,
    /// New comment created via the REST layer
    Comment,
    /// Comment resolved or unresolved
    CommentUpdate,
    /// Comment removed
    CommentDelete,
}

/// The wire envelope exchanged on the document socket.
///
/// The payload is opaque JSON: the server forwards it byte-for-byte and never
/// interprets its contents. When a message arrives from a client,
/// `document_id` and `user_id` are overwritten with the server-authoritative
/// values before further processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub document_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    pub payload: Box<RawValue>,
}

impl WsMessage {
    /// Build a server-originated message (no originating user).
    pub fn server(kind: MessageType, document_id: &str, payload: Box<RawValue>) -> Self {
        Self {
            kind,
            document_id: document_id.to_string(),
            user_id: String::new(),
            payload,
        }
    }
}

/// Presence entry for one user in a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStatus {
    pub user_id: String,
    pub cursor_pos: i64,
    pub last_seen: DateTime<Utc>,
}

/// Permission role resolved at the socket handshake and for REST mutations.
///
/// Writer is the only role permitted to produce UPDATE frames on a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Writer,
    Reviewer,
    Reader,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Writer => "writer",
            Role::Reviewer => "reviewer",
            Role::Reader => "reader",
        }
    }

    /// Parse a stored role, defaulting unknown values to the weakest role.
    pub fn from_db(value: &str) -> Role {
        match value {
            "writer" => Role::Writer,
            "reviewer" => Role::Reviewer,
            _ => Role::Reader,
        }
    }

    pub fn can_edit(self) -> bool {
        matches!(self, Role::Writer)
    }

    pub fn can_comment(self) -> bool {
        matches!(self, Role::Writer | Role::Reviewer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_wire_names() {
        let json = serde_json::to_string(&MessageType::PresenceUpdate).unwrap();
        assert_eq!(json, "\"PRESENCE_UPDATE\"");
        let parsed: MessageType = serde_json::from_str("\"COMMENT_DELETE\"").unwrap();
        assert_eq!(parsed, MessageType::CommentDelete);
    }

    #[test]
    fn envelope_roundtrip_preserves_raw_payload() {
        let raw = r#"{"type":"UPDATE","document_id":"d1","user_id":"u1","payload":{"ops":[{"insert":"Hi"}]}}"#;
        let msg: WsMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.kind, MessageType::Update);
        assert_eq!(msg.payload.get(), r#"{"ops":[{"insert":"Hi"}]}"#);
    }

    #[test]
    fn server_messages_omit_empty_user_id() {
        let payload = serde_json::value::to_raw_value(&serde_json::json!({"title": "T"})).unwrap();
        let msg = WsMessage::server(MessageType::Metadata, "d1", payload);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("user_id"));
    }

    #[test]
    fn unknown_role_falls_back_to_reader() {
        assert_eq!(Role::from_db("admin"), Role::Reader);
        assert_eq!(Role::from_db("reviewer"), Role::Reviewer);
        assert!(Role::Writer.can_edit());
        assert!(!Role::Reviewer.can_edit());
        assert!(Role::Reviewer.can_comment());
        assert!(!Role::Reader.can_comment());
    }
}
