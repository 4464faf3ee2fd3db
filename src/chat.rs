//! Room chat.
//!
//! Sending is fire-and-forget. The relay forwards every message to all room
//! members, the sender included, so the local log is filled only from
//! received frames. Self/other is decided by comparing declared usernames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, SessionError};
use crate::protocol::{ChatPayload, ClientMessage};

/// One received chat message. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Arrival position within this session, starting at 0.
    pub sequence: u64,
    pub username: String,
    pub text: String,
}

/// Shared "chat panel is visible" flag.
///
/// Owned by the UI, read by the session loop once per incoming message.
#[derive(Debug, Clone, Default)]
pub struct PanelVisibility(Arc<AtomicBool>);

impl PanelVisibility {
    pub fn set(&self, visible: bool) {
        self.0.store(visible, Ordering::Release);
    }

    pub fn is_visible(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What the session should do with a received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message: ChatMessage,
    pub from_self: bool,
    /// `true` when a transient "new message" notice should be shown.
    pub notify: bool,
}

/// Build a `send-message` frame from `username` to `room_id`.
///
/// The text goes out exactly as typed; it is only checked for blankness.
///
/// # Errors
///
/// Returns [`SessionError::EmptyMessage`] if `text` is blank.
pub fn compose(room_id: &str, username: &str, text: impl Into<String>) -> Result<ClientMessage> {
    let text = text.into();
    if text.trim().is_empty() {
        return Err(SessionError::EmptyMessage);
    }
    Ok(ClientMessage::SendMessage {
        room_id: room_id.to_owned(),
        message: ChatPayload {
            username: username.to_owned(),
            message: text,
        },
    })
}

/// Ordered, append-only chat log for one session.
#[derive(Debug, Clone)]
pub struct ChatChannel {
    local_username: String,
    log: Vec<ChatMessage>,
}

impl ChatChannel {
    pub fn new(local_username: impl Into<String>) -> Self {
        Self {
            local_username: local_username.into(),
            log: Vec::new(),
        }
    }

    /// Append a received message.
    pub fn receive(&mut self, payload: ChatPayload, panel_visible: bool) -> Delivery {
        let from_self = payload.username == self.local_username;
        let message = ChatMessage {
            sequence: self.log.len() as u64,
            username: payload.username,
            text: payload.message,
        };
        self.log.push(message.clone());
        Delivery {
            message,
            from_self,
            notify: !from_self && !panel_visible,
        }
    }

    /// Every message received so far, in arrival order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.log
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

    fn payload(user: &str, text: &str) -> ChatPayload {
        ChatPayload {
            username: user.into(),
            message: text.into(),
        }
    }

    #[test]
    fn compose_carries_room_and_local_name() {
        let msg = compose("R1", "alice", "hello").unwrap();
        assert_eq!(
            msg,
            ClientMessage::SendMessage {
                room_id: "R1".into(),
                message: payload("alice", "hello"),
            }
        );
    }

    #[test]
    fn blank_messages_are_rejected() {
        assert!(matches!(compose("R1", "alice", ""), Err(SessionError::EmptyMessage)));
        assert!(matches!(
            compose("R1", "alice", "  \n\t"),
            Err(SessionError::EmptyMessage)
        ));
    }

    #[test]
    fn text_is_sent_untrimmed() {
        match compose("R1", "alice", "  indented\n").unwrap() {
            ClientMessage::SendMessage { message, .. } => assert_eq!(message.message, "  indented\n"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn collapsed_panel_notifies_for_others_only() {
        let mut chat = ChatChannel::new("bob");
        let from_alice = chat.receive(payload("alice", "hello"), false);
        assert!(from_alice.notify);
        assert!(!from_alice.from_self);

        let own_echo = chat.receive(payload("bob", "hi"), false);
        assert!(!own_echo.notify);
        assert!(own_echo.from_self);
    }

    #[test]
    fn expanded_panel_appends_without_notice() {
        let mut chat = ChatChannel::new("bob");
        let delivery = chat.receive(payload("alice", "hello"), true);
        assert!(!delivery.notify);
        assert_eq!(chat.messages().len(), 1);
    }

    #[test]
    fn messages_keep_arrival_order() {
        let mut chat = ChatChannel::new("bob");
        chat.receive(payload("carol", "1"), true);
        chat.receive(payload("alice", "2"), true);
        chat.receive(payload("carol", "3"), true);
        let log = chat.messages();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].sequence, 0);
        assert_eq!(log[2].sequence, 2);
        assert_eq!(log[1].text, "2");
    }

    #[test]
    fn visibility_flag_is_shared_between_clones() {
        let ui = PanelVisibility::default();
        let session = ui.clone();
        assert!(!session.is_visible());
        ui.set(true);
        assert!(session.is_visible());
    }
}
