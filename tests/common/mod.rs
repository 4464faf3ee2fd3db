#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for CodeRoom client integration tests.
//!
//! Provides a scripted [`MockTransport`], a channel-driven [`LiveTransport`]
//! for interactive scenarios, and helpers for building relay frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use coderoom_client::protocol::{ChatPayload, ClientMessage, Participant, RelayMessage};
use coderoom_client::{SessionError, SessionEvent, Transport};
use tokio::sync::mpsc;

// ── MockTransport ───────────────────────────────────────────────────

/// A scripted mock transport.
///
/// Scripted relay frames are consumed in order by `recv()`. Once the script
/// is exhausted `recv()` pends forever, keeping the session alive until
/// `leave()`. All frames sent by the client are recorded in `sent`.
pub struct MockTransport {
    incoming: VecDeque<Option<Result<String, SessionError>>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Returns the transport plus shared handles for inspecting sent frames
    /// and whether close was called.
    pub fn new(
        incoming: Vec<Option<Result<String, SessionError>>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── LiveTransport ───────────────────────────────────────────────────

/// Channel-driven transport: the test plays the relay.
pub struct LiveTransport {
    inbound: mpsc::UnboundedReceiver<Option<Result<String, SessionError>>>,
    outbound: mpsc::UnboundedSender<String>,
    pub closed: Arc<AtomicBool>,
}

/// The relay side of a [`LiveTransport`].
pub struct RelaySide {
    inbound: mpsc::UnboundedSender<Option<Result<String, SessionError>>>,
    outbound: mpsc::UnboundedReceiver<String>,
    pub closed: Arc<AtomicBool>,
}

impl LiveTransport {
    pub fn pair() -> (Self, RelaySide) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                inbound: in_rx,
                outbound: out_tx,
                closed: Arc::clone(&closed),
            },
            RelaySide {
                inbound: in_tx,
                outbound: out_rx,
                closed,
            },
        )
    }
}

#[async_trait]
impl Transport for LiveTransport {
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        self.outbound
            .send(message)
            .map_err(|_| SessionError::TransportClosed)
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        match self.inbound.recv().await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl RelaySide {
    /// Deliver a relay frame to the client. Ignored once the session ended.
    pub fn push(&self, frame: String) {
        let _ = self.inbound.send(Some(Ok(frame)));
    }

    /// Make the client's next `recv()` fail.
    pub fn fail(&self, reason: &str) {
        let _ = self
            .inbound
            .send(Some(Err(SessionError::TransportReceive(reason.into()))));
    }

    /// Next frame sent by the client, decoded.
    pub async fn next_sent(&mut self) -> ClientMessage {
        let raw = tokio::time::timeout(Duration::from_secs(2), self.outbound.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("client transport dropped");
        serde_json::from_str(&raw).expect("client sent invalid frame")
    }

    /// Returns `true` if no client frame is waiting.
    pub fn nothing_sent(&mut self) -> bool {
        self.outbound.try_recv().is_err()
    }
}

// ── Event helpers ───────────────────────────────────────────────────

/// Receive the next event, failing the test after two seconds.
pub async fn next_event(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

/// Receive events until `pred` matches, returning the match.
pub async fn wait_for<F>(rx: &mut mpsc::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    loop {
        let ev = next_event(rx).await;
        if pred(&ev) {
            return ev;
        }
    }
}

/// Drain every event up to and including `Disconnected`.
pub async fn drain_to_end(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    loop {
        let ev = next_event(rx).await;
        let done = matches!(ev, SessionEvent::Disconnected { .. });
        out.push(ev);
        if done {
            return out;
        }
    }
}

/// Decode every frame recorded by a [`MockTransport`].
pub fn decode_sent(sent: &Arc<StdMutex<Vec<String>>>) -> Vec<ClientMessage> {
    sent.lock()
        .unwrap()
        .iter()
        .map(|raw| serde_json::from_str(raw).expect("client sent invalid frame"))
        .collect()
}

// ── Relay frame builders ────────────────────────────────────────────

pub fn participant(socket_id: &str, username: &str) -> Participant {
    Participant::new(socket_id, username)
}

/// `joined` broadcast with `clients` as `(socket_id, username)` pairs.
pub fn joined_json(clients: &[(&str, &str)], username: &str, socket_id: &str) -> String {
    serde_json::to_string(&RelayMessage::Joined {
        clients: clients
            .iter()
            .map(|(id, name)| participant(id, name))
            .collect(),
        username: username.into(),
        socket_id: socket_id.into(),
    })
    .expect("joined_json serialization")
}

pub fn sync_code_json(code: Option<&str>) -> String {
    serde_json::to_string(&RelayMessage::SyncCode {
        code: code.map(Into::into),
    })
    .expect("sync_code_json serialization")
}

pub fn code_change_json(code: &str) -> String {
    serde_json::to_string(&RelayMessage::CodeChange { code: code.into() })
        .expect("code_change_json serialization")
}

pub fn disconnected_json(socket_id: &str, username: &str) -> String {
    serde_json::to_string(&RelayMessage::Disconnected {
        socket_id: socket_id.into(),
        username: username.into(),
    })
    .expect("disconnected_json serialization")
}

pub fn receive_message_json(room_id: &str, username: &str, text: &str) -> String {
    serde_json::to_string(&RelayMessage::ReceiveMessage {
        room_id: Some(room_id.into()),
        message: ChatPayload {
            username: username.into(),
            message: text.into(),
        },
    })
    .expect("receive_message_json serialization")
}
