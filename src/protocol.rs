//! Wire types for the room relay protocol.
//!
//! Every frame is a JSON object `{"type": "<event-name>", "data": {...}}`.
//! Event names are kebab-case (`sync-code`, `receive-message`) and payload
//! fields are camelCase (`roomId`, `socketId`), matching what the relay
//! rebroadcasts between room members.

use serde::{Deserialize, Serialize};

// ── Type aliases ────────────────────────────────────────────────────

/// Relay-assigned connection identifier. Not stable across reconnects.
pub type SocketId = String;

/// Caller-chosen opaque room identifier.
pub type RoomId = String;

// ── Structs ─────────────────────────────────────────────────────────

/// One member of a room as reported by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub socket_id: SocketId,
    /// Display name. Not unique: two members may share one.
    pub username: String,
}

impl Participant {
    /// Create a participant entry.
    pub fn new(socket_id: impl Into<SocketId>, username: impl Into<String>) -> Self {
        Self {
            socket_id: socket_id.into(),
            username: username.into(),
        }
    }
}

/// Chat payload as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Sender's self-declared display name.
    pub username: String,
    /// Message text.
    pub message: String,
}

// ── Messages ────────────────────────────────────────────────────────

/// Frames sent from the client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Request to enter a room. Must be the first frame of a session.
    Join { room_id: RoomId, username: String },
    /// Full buffer unicast to one specific member (the one who just joined).
    SyncCode { code: String, socket_id: SocketId },
    /// Full buffer broadcast to the room after a local edit.
    CodeChange { room_id: RoomId, code: String },
    /// Chat append.
    SendMessage {
        room_id: RoomId,
        message: ChatPayload,
    },
}

/// Frames sent from the relay to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum RelayMessage {
    /// Full roster snapshot plus the identity of the member who just joined.
    Joined {
        clients: Vec<Participant>,
        username: String,
        socket_id: SocketId,
    },
    /// A peer's full buffer, addressed to this client. `None` when the peer
    /// had nothing to share.
    SyncCode { code: Option<String> },
    /// A peer's full buffer after one of its edits.
    CodeChange { code: String },
    /// One member left the room.
    Disconnected {
        socket_id: SocketId,
        username: String,
    },
    /// Chat append forwarded to every member, the sender included.
    ReceiveMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        message: ChatPayload,
    },
}

impl RelayMessage {
    /// Wire name of this frame, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "joined",
            Self::SyncCode { .. } => "sync-code",
            Self::CodeChange { .. } => "code-change",
            Self::Disconnected { .. } => "disconnected",
            Self::ReceiveMessage { .. } => "receive-message",
        }
    }
}

impl ClientMessage {
    /// Wire name of this frame, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::SyncCode { .. } => "sync-code",
            Self::CodeChange { .. } => "code-change",
            Self::SendMessage { .. } => "send-message",
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_uses_event_name_and_camel_case_fields() {
        let msg = ClientMessage::Join {
            room_id: "R1".into(),
            username: "bob".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "join", "data": {"roomId": "R1", "username": "bob"}})
        );
    }

    #[test]
    fn sync_code_is_addressed_by_socket_id() {
        let msg = ClientMessage::SyncCode {
            code: "print(1)".into(),
            socket_id: "sock-b".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "sync-code");
        assert_eq!(value["data"]["socketId"], "sock-b");
        assert_eq!(value["data"]["code"], "print(1)");
    }

    #[test]
    fn joined_parses_full_roster() {
        let raw = r#"{"type":"joined","data":{
            "clients":[{"socketId":"a","username":"alice"},{"socketId":"b","username":"bob"}],
            "username":"bob","socketId":"b"}}"#;
        let msg: RelayMessage = serde_json::from_str(raw).unwrap();
        match msg {
            RelayMessage::Joined {
                clients,
                username,
                socket_id,
            } => {
                assert_eq!(clients.len(), 2);
                assert_eq!(clients[1], Participant::new("b", "bob"));
                assert_eq!(username, "bob");
                assert_eq!(socket_id, "b");
            }
            other => panic!("expected Joined, got {other:?}"),
        }
    }

    #[test]
    fn sync_code_accepts_null_code() {
        let msg: RelayMessage =
            serde_json::from_str(r#"{"type":"sync-code","data":{"code":null}}"#).unwrap();
        assert_eq!(msg, RelayMessage::SyncCode { code: None });
    }

    #[test]
    fn receive_message_without_room_id() {
        let raw = r#"{"type":"receive-message","data":{"message":{"username":"alice","message":"hello"}}}"#;
        let msg: RelayMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.kind(), "receive-message");
        assert!(matches!(
            msg,
            RelayMessage::ReceiveMessage { room_id: None, .. }
        ));
    }

    #[test]
    fn disconnected_missing_socket_id_is_rejected() {
        let raw = r#"{"type":"disconnected","data":{"username":"alice"}}"#;
        assert!(serde_json::from_str::<RelayMessage>(raw).is_err());
    }

    #[test]
    fn unknown_event_is_rejected() {
        let raw = r#"{"type":"cursor-move","data":{"x":1}}"#;
        assert!(serde_json::from_str::<RelayMessage>(raw).is_err());
    }
}
