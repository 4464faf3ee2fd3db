//! # Scripted Room Example
//!
//! Runs a session against an in-process relay stand-in and walks through
//! the join handshake:
//!
//! 1. The relay reports a roster with one peer already present
//! 2. That peer unicasts its buffer, which becomes ours
//! 3. A chat message arrives while the chat panel is collapsed
//! 4. The peer leaves and we leave too
//!
//! ## Running
//!
//! ```sh
//! cargo run --example scripted_room
//! ```

use async_trait::async_trait;
use coderoom_client::protocol::{ChatPayload, ClientMessage, Participant, RelayMessage};
use coderoom_client::{
    JoinParams, RoomSession, SessionConfig, SessionError, SessionEvent, Transport,
};
use tokio::sync::mpsc;

/// Client half of an in-process channel pair.
struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        self.tx
            .send(message)
            .map_err(|_| SessionError::TransportClosed)
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.rx.close();
        Ok(())
    }
}

fn frame(msg: &RelayMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (client_tx, mut relay_rx) = mpsc::unbounded_channel();
    let (relay_tx, client_rx) = mpsc::unbounded_channel();
    let transport = LoopbackTransport {
        tx: client_tx,
        rx: client_rx,
    };

    let (mut session, mut events) = RoomSession::join(
        transport,
        JoinParams::new("R1", "bob"),
        SessionConfig::new(),
    )?;

    // Play the relay: wait for `join`, then run the script.
    let relay = tokio::spawn(async move {
        while let Some(raw) = relay_rx.recv().await {
            let Ok(msg) = serde_json::from_str::<ClientMessage>(&raw) else {
                continue;
            };
            println!("client -> relay: {}", msg.kind());
            if !matches!(msg, ClientMessage::Join { .. }) {
                continue;
            }
            let script = [
                RelayMessage::Joined {
                    clients: vec![Participant::new("a", "alice"), Participant::new("b", "bob")],
                    username: "bob".into(),
                    socket_id: "b".into(),
                },
                RelayMessage::SyncCode {
                    code: Some("print(\"hello from alice\")".into()),
                },
                RelayMessage::ReceiveMessage {
                    room_id: Some("R1".into()),
                    message: ChatPayload {
                        username: "alice".into(),
                        message: "welcome!".into(),
                    },
                },
                RelayMessage::Disconnected {
                    socket_id: "a".into(),
                    username: "alice".into(),
                },
            ];
            for msg in &script {
                match frame(msg) {
                    Ok(json) => {
                        if relay_tx.send(json).is_err() {
                            return;
                        }
                    }
                    Err(e) => tracing::error!("could not encode relay frame: {e}"),
                }
            }
        }
    });

    while let Some(event) = events.recv().await {
        match &event {
            SessionEvent::Notice(notice) => println!("notice: {notice}"),
            SessionEvent::RemoteBuffer { code, .. } => println!("buffer: {code}"),
            SessionEvent::MessageReceived { message, .. } => {
                println!("chat: {}: {}", message.username, message.text);
            }
            SessionEvent::ParticipantLeft { .. } => {
                println!("participants now: {:?}", session.participants().await);
                break;
            }
            other => println!("event: {other:?}"),
        }
    }

    session.leave().await;
    relay.abort();
    Ok(())
}
