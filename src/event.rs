//! Events surfaced by a [`RoomSession`](crate::session::RoomSession).

use std::fmt;

use crate::chat::ChatMessage;
use crate::protocol::{Participant, SocketId};
use crate::sync::{BufferOrigin, SyncOutcome};

/// Transient user-visible notification.
///
/// The `Display` impl gives the text to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Another member joined. Never emitted for the local member's own join.
    ParticipantJoined { username: String },
    /// A member left.
    ParticipantLeft { username: String },
    /// A message arrived from someone else while the chat panel was collapsed.
    NewMessage { from: String },
    /// The relay channel failed; the session is over.
    ConnectionFailed,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParticipantJoined { username } => write!(f, "{username} joined the room."),
            Self::ParticipantLeft { username } => write!(f, "{username} left the room."),
            Self::NewMessage { from } => write!(f, "New message from {from}"),
            Self::ConnectionFailed => f.write_str("Socket connection failed, try again later."),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The local member called `leave()` or dropped the handle.
    Left,
    /// The relay closed the channel.
    RelayClosed,
    /// The channel failed.
    ConnectionFailed(String),
}

impl DisconnectReason {
    /// Returns `true` when the UI should show a failure and return to the
    /// pre-join state.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Left)
    }
}

/// Events emitted by the session loop, in processing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Synthetic: the loop started and `join` was queued.
    Connected,
    /// The roster changed. Carries the complete new roster.
    RosterUpdated { participants: Vec<Participant> },
    /// A member left the room.
    ParticipantLeft {
        socket_id: SocketId,
        username: String,
    },
    /// The shared buffer was replaced by a remote snapshot. The UI should
    /// set its editor contents to `code`.
    RemoteBuffer { code: String, origin: BufferOrigin },
    /// The join handshake finished.
    InitialSyncSettled { outcome: SyncOutcome },
    /// A chat message was appended to the log.
    MessageReceived {
        message: ChatMessage,
        from_self: bool,
    },
    /// Something to show the user briefly.
    Notice(Notice),
    /// Terminal event. Always the last one delivered.
    Disconnected { reason: DisconnectReason },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_texts() {
        assert_eq!(
            Notice::ParticipantJoined {
                username: "bob".into()
            }
            .to_string(),
            "bob joined the room."
        );
        assert_eq!(
            Notice::ParticipantLeft {
                username: "bob".into()
            }
            .to_string(),
            "bob left the room."
        );
        assert_eq!(
            Notice::NewMessage {
                from: "alice".into()
            }
            .to_string(),
            "New message from alice"
        );
        assert_eq!(
            Notice::ConnectionFailed.to_string(),
            "Socket connection failed, try again later."
        );
    }

    #[test]
    fn only_explicit_leave_is_not_a_failure() {
        assert!(!DisconnectReason::Left.is_failure());
        assert!(DisconnectReason::RelayClosed.is_failure());
        assert!(DisconnectReason::ConnectionFailed("reset".into()).is_failure());
    }
}
