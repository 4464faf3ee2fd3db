#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for `RoomSession`.
//!
//! `MockTransport` scripts the relay up front; `LiveTransport` lets a test
//! play the relay step by step and observe every frame the client sends.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use coderoom_client::protocol::{ChatPayload, ClientMessage};
use coderoom_client::{
    BufferOrigin, ConnectionState, DisconnectReason, JoinParams, MembershipState, Notice,
    RoomSession, SessionConfig, SessionError, SessionEvent, SyncOutcome,
};
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use common::{
    code_change_json, decode_sent, disconnected_json, drain_to_end, joined_json, next_event,
    participant, receive_message_json, sync_code_json, wait_for, LiveTransport, MockTransport,
    RelaySide,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn live_session(
    room: &str,
    user: &str,
    config: SessionConfig,
) -> (RoomSession, mpsc::Receiver<SessionEvent>, RelaySide) {
    let (transport, relay) = LiveTransport::pair();
    let (session, events) =
        RoomSession::join(transport, JoinParams::new(room, user), config).expect("valid join");
    (session, events, relay)
}

/// Join, check the `join` frame and the `Connected` event, then deliver the
/// first roster.
async fn join_room(
    relay: &mut RelaySide,
    events: &mut mpsc::Receiver<SessionEvent>,
    room: &str,
    user: &str,
    roster: &[(&str, &str)],
    own_socket: &str,
) {
    assert_eq!(
        relay.next_sent().await,
        ClientMessage::Join {
            room_id: room.into(),
            username: user.into(),
        }
    );
    assert_eq!(next_event(events).await, SessionEvent::Connected);
    relay.push(joined_json(roster, user, own_socket));
    assert!(matches!(
        next_event(events).await,
        SessionEvent::RosterUpdated { .. }
    ));
}

fn no_sync_timeout() -> SessionConfig {
    SessionConfig::new().with_initial_sync_timeout(Duration::from_secs(60))
}

// ════════════════════════════════════════════════════════════════════
// Join
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn invalid_join_is_rejected_before_anything_is_sent() {
    let (transport, sent, _closed) = MockTransport::new(vec![]);
    let result = RoomSession::join(transport, JoinParams::new("R1", ""), SessionConfig::new());
    assert!(matches!(result, Err(SessionError::InvalidJoin(_))));
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn join_frame_is_sent_first() {
    let (transport, sent, _closed) = MockTransport::new(vec![]);
    let (mut session, mut events) =
        RoomSession::join(transport, JoinParams::new("R1", "alice"), no_sync_timeout()).unwrap();

    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    assert_eq!(session.connection_state(), ConnectionState::Connected);
    assert_eq!(session.membership_state().await, MembershipState::Joining);

    session.leave().await;
    assert_eq!(
        decode_sent(&sent),
        vec![ClientMessage::Join {
            room_id: "R1".into(),
            username: "alice".into(),
        }]
    );
}

#[tokio::test]
async fn solo_room_settles_immediately() {
    let (mut session, mut events, mut relay) = live_session("R1", "alice", no_sync_timeout());
    join_room(&mut relay, &mut events, "R1", "alice", &[("a", "alice")], "a").await;

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::InitialSyncSettled {
            outcome: SyncOutcome::Solo
        }
    );
    assert_eq!(session.membership_state().await, MembershipState::Joined);
    assert_eq!(session.buffer().await, None);
    session.leave().await;
}

// ════════════════════════════════════════════════════════════════════
// Code sync handshake
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn existing_member_sends_buffer_to_newcomer() {
    let (mut alice, mut events, mut relay) = live_session("R1", "alice", no_sync_timeout());
    join_room(&mut relay, &mut events, "R1", "alice", &[("a", "alice")], "a").await;
    next_event(&mut events).await; // solo settle

    assert_ok!(alice.edit_buffer("print(1)"));
    assert_eq!(
        relay.next_sent().await,
        ClientMessage::CodeChange {
            room_id: "R1".into(),
            code: "print(1)".into(),
        }
    );

    relay.push(joined_json(&[("a", "alice"), ("b", "bob")], "bob", "b"));
    assert_eq!(
        relay.next_sent().await,
        ClientMessage::SyncCode {
            code: "print(1)".into(),
            socket_id: "b".into(),
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::RosterUpdated {
            participants: vec![participant("a", "alice"), participant("b", "bob")],
        }
    );
    let notice = next_event(&mut events).await;
    assert_eq!(
        notice,
        SessionEvent::Notice(Notice::ParticipantJoined {
            username: "bob".into()
        })
    );
    if let SessionEvent::Notice(n) = notice {
        assert_eq!(n.to_string(), "bob joined the room.");
    }
    alice.leave().await;
}

#[tokio::test]
async fn newcomer_takes_first_snapshot_and_stays_silent_about_itself() {
    let (mut bob, mut events, mut relay) = live_session("R1", "bob", no_sync_timeout());
    join_room(
        &mut relay,
        &mut events,
        "R1",
        "bob",
        &[("a", "alice"), ("b", "bob")],
        "b",
    )
    .await;

    relay.push(sync_code_json(Some("print(1)")));
    relay.push(sync_code_json(Some("print(2)")));
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::RemoteBuffer {
            code: "print(1)".into(),
            origin: BufferOrigin::InitialSync,
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::InitialSyncSettled {
            outcome: SyncOutcome::FromPeer
        }
    );

    // The second snapshot is discarded; the next event comes from this edit.
    relay.push(code_change_json("print(3)"));
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::RemoteBuffer {
            code: "print(3)".into(),
            origin: BufferOrigin::PeerEdit,
        }
    );
    assert_eq!(bob.buffer().await.as_deref(), Some("print(3)"));
    assert!(relay.nothing_sent());
    bob.leave().await;
}

#[tokio::test]
async fn missing_snapshot_times_out_and_late_snapshot_still_fills_empty_buffer() {
    let config = SessionConfig::new().with_initial_sync_timeout(Duration::from_millis(300));
    let (mut bob, mut events, mut relay) = live_session("R1", "bob", config);
    join_room(
        &mut relay,
        &mut events,
        "R1",
        "bob",
        &[("a", "alice"), ("b", "bob")],
        "b",
    )
    .await;

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::InitialSyncSettled {
            outcome: SyncOutcome::TimedOut
        }
    );

    relay.push(sync_code_json(Some("late")));
    relay.push(sync_code_json(Some("later")));
    relay.push(code_change_json("fresh"));
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::RemoteBuffer {
            code: "late".into(),
            origin: BufferOrigin::InitialSync,
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::RemoteBuffer {
            code: "fresh".into(),
            origin: BufferOrigin::PeerEdit,
        }
    );
    bob.leave().await;
}

#[tokio::test]
async fn sync_wait_starts_when_the_roster_arrives() {
    let config = SessionConfig::new().with_initial_sync_timeout(Duration::from_millis(200));
    let (mut bob, mut events, mut relay) = live_session("R1", "bob", config);
    assert!(matches!(relay.next_sent().await, ClientMessage::Join { .. }));
    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);

    // The relay answers `join` well after the configured wait.
    tokio::time::sleep(Duration::from_millis(400)).await;
    relay.push(joined_json(&[("a", "alice"), ("b", "bob")], "bob", "b"));
    relay.push(sync_code_json(Some("print(1)")));

    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::RosterUpdated { .. }
    ));
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::RemoteBuffer {
            code: "print(1)".into(),
            origin: BufferOrigin::InitialSync,
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::InitialSyncSettled {
            outcome: SyncOutcome::FromPeer
        }
    );
    assert_eq!(bob.buffer().await.as_deref(), Some("print(1)"));
    bob.leave().await;
}

#[tokio::test]
async fn null_snapshot_is_ignored() {
    let (mut bob, mut events, mut relay) = live_session("R1", "bob", no_sync_timeout());
    join_room(
        &mut relay,
        &mut events,
        "R1",
        "bob",
        &[("a", "alice"), ("b", "bob")],
        "b",
    )
    .await;

    relay.push(sync_code_json(None));
    relay.push(sync_code_json(Some("real")));
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::RemoteBuffer {
            code: "real".into(),
            origin: BufferOrigin::InitialSync,
        }
    );
    bob.leave().await;
}

// ════════════════════════════════════════════════════════════════════
// Membership
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn departures_update_roster_and_unknown_ones_are_silent() {
    let (mut alice, mut events, mut relay) = live_session("R1", "alice", no_sync_timeout());
    join_room(
        &mut relay,
        &mut events,
        "R1",
        "alice",
        &[("a", "alice"), ("b", "bob"), ("c", "carol")],
        "a",
    )
    .await;

    relay.push(disconnected_json("ghost", "ghost"));
    relay.push(disconnected_json("b", "bob"));

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::ParticipantLeft {
            socket_id: "b".into(),
            username: "bob".into(),
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::RosterUpdated {
            participants: vec![participant("a", "alice"), participant("c", "carol")],
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Notice(Notice::ParticipantLeft {
            username: "bob".into()
        })
    );
    assert_eq!(alice.participants().await.len(), 2);
    alice.leave().await;
}

// ════════════════════════════════════════════════════════════════════
// Chat
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn collapsed_panel_raises_notice_expanded_does_not() {
    let (mut bob, mut events, mut relay) = live_session("R1", "bob", no_sync_timeout());
    join_room(
        &mut relay,
        &mut events,
        "R1",
        "bob",
        &[("a", "alice"), ("b", "bob")],
        "b",
    )
    .await;

    bob.set_chat_panel_visible(false);
    relay.push(receive_message_json("R1", "alice", "hello"));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::MessageReceived { from_self: false, .. }
    ));
    let notice = next_event(&mut events).await;
    assert_eq!(
        notice,
        SessionEvent::Notice(Notice::NewMessage {
            from: "alice".into()
        })
    );

    bob.set_chat_panel_visible(true);
    relay.push(receive_message_json("R1", "alice", "again"));
    relay.push(code_change_json("marker"));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::MessageReceived { .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::RemoteBuffer { .. }
    ));

    let log = bob.messages().await;
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].text, "hello");
    assert_eq!(log[1].sequence, 1);
    bob.leave().await;
}

#[tokio::test]
async fn own_message_appears_only_when_echoed() {
    let (mut alice, mut events, mut relay) = live_session("R1", "alice", no_sync_timeout());
    join_room(&mut relay, &mut events, "R1", "alice", &[("a", "alice")], "a").await;

    assert_ok!(alice.send_message("hello"));
    assert_eq!(
        relay.next_sent().await,
        ClientMessage::SendMessage {
            room_id: "R1".into(),
            message: ChatPayload {
                username: "alice".into(),
                message: "hello".into(),
            },
        }
    );
    assert!(alice.messages().await.is_empty());

    relay.push(receive_message_json("R1", "alice", "hello"));
    let ev = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::MessageReceived { .. })
    })
    .await;
    assert!(matches!(
        ev,
        SessionEvent::MessageReceived { from_self: true, .. }
    ));
    assert_eq!(alice.messages().await.len(), 1);
    alice.leave().await;
}

#[tokio::test]
async fn blank_message_is_not_sent() {
    let (mut alice, mut events, mut relay) = live_session("R1", "alice", no_sync_timeout());
    join_room(&mut relay, &mut events, "R1", "alice", &[("a", "alice")], "a").await;

    let err = assert_err!(alice.send_message("   \n"));
    assert!(matches!(err, SessionError::EmptyMessage));
    assert!(relay.nothing_sent());
    alice.leave().await;
}

// ════════════════════════════════════════════════════════════════════
// Robustness
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn malformed_frames_are_dropped_and_session_survives() {
    let (transport, _sent, _closed) = MockTransport::new(vec![
        Some(Ok("not json".into())),
        Some(Ok(r#"{"type":"joined","data":{}}"#.into())),
        Some(Ok(r#"{"type":"mystery","data":{"x":1}}"#.into())),
        Some(Ok(format!(
            r#"{{"type":"code-change","data":{{"code":"{}"#,
            "x".repeat(4096)
        ))),
        Some(Ok(code_change_json("ok"))),
    ]);
    let (mut session, mut events) =
        RoomSession::join(transport, JoinParams::new("R1", "alice"), no_sync_timeout()).unwrap();

    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::RemoteBuffer {
            code: "ok".into(),
            origin: BufferOrigin::PeerEdit,
        }
    );
    assert_eq!(session.connection_state(), ConnectionState::Connected);
    session.leave().await;
}

#[tokio::test]
async fn full_event_channel_still_delivers_disconnected() {
    let mut script: Vec<_> = (0..5)
        .map(|i| Some(Ok(code_change_json(&format!("v{i}")))))
        .collect();
    script.push(None);
    let (transport, _sent, _closed) = MockTransport::new(script);
    let config = no_sync_timeout().with_event_channel_capacity(1);
    let (_session, mut events) =
        RoomSession::join(transport, JoinParams::new("R1", "alice"), config).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Disconnected {
            reason: DisconnectReason::RelayClosed
        }
    );
}

// ════════════════════════════════════════════════════════════════════
// Teardown
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn transport_failure_ends_session_with_notice() {
    let (mut bob, mut events, mut relay) = live_session("R1", "bob", no_sync_timeout());
    let mut updates = bob.connection_updates();
    join_room(
        &mut relay,
        &mut events,
        "R1",
        "bob",
        &[("a", "alice"), ("b", "bob")],
        "b",
    )
    .await;

    relay.fail("connection reset");
    let tail = drain_to_end(&mut events).await;
    assert_eq!(
        tail,
        vec![
            SessionEvent::Notice(Notice::ConnectionFailed),
            SessionEvent::Disconnected {
                reason: DisconnectReason::ConnectionFailed(
                    "transport receive error: connection reset".into()
                ),
            },
        ]
    );
    if let SessionEvent::Notice(n) = &tail[0] {
        assert_eq!(n.to_string(), "Socket connection failed, try again later.");
    }

    assert!(relay.closed.load(Ordering::Relaxed));
    assert_eq!(bob.connection_state(), ConnectionState::Errored);
    assert!(updates.has_changed().unwrap());
    assert_eq!(*updates.borrow_and_update(), ConnectionState::Errored);
    assert_eq!(bob.membership_state().await, MembershipState::Left);
    assert!(matches!(
        bob.edit_buffer("x"),
        Err(SessionError::NotConnected)
    ));
    bob.leave().await;
}

#[tokio::test]
async fn relay_hang_up_ends_session() {
    let (transport, _sent, closed) =
        MockTransport::new(vec![Some(Ok(joined_json(&[("a", "alice")], "alice", "a"))), None]);
    let (session, mut events) =
        RoomSession::join(transport, JoinParams::new("R1", "alice"), no_sync_timeout()).unwrap();

    let tail = drain_to_end(&mut events).await;
    assert_eq!(
        tail.last(),
        Some(&SessionEvent::Disconnected {
            reason: DisconnectReason::RelayClosed
        })
    );
    assert!(closed.load(Ordering::Relaxed));
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn leave_is_idempotent_and_disconnected_is_last() {
    let (mut alice, mut events, mut relay) = live_session("R1", "alice", no_sync_timeout());
    join_room(&mut relay, &mut events, "R1", "alice", &[("a", "alice")], "a").await;

    alice.leave().await;
    alice.leave().await;

    let tail = drain_to_end(&mut events).await;
    assert_eq!(
        tail.last(),
        Some(&SessionEvent::Disconnected {
            reason: DisconnectReason::Left
        })
    );
    assert!(events.recv().await.is_none());
    assert!(relay.closed.load(Ordering::Relaxed));
    assert_eq!(alice.membership_state().await, MembershipState::Left);
    assert_eq!(alice.connection_state(), ConnectionState::Disconnected);
    assert!(matches!(
        alice.send_message("late"),
        Err(SessionError::NotConnected)
    ));
}

#[tokio::test]
async fn frames_after_leave_produce_nothing() {
    let (mut alice, mut events, mut relay) = live_session("R1", "alice", no_sync_timeout());
    join_room(&mut relay, &mut events, "R1", "alice", &[("a", "alice")], "a").await;

    alice.leave().await;
    relay.push(code_change_json("too late"));
    relay.push(receive_message_json("R1", "bob", "hello?"));

    let tail = drain_to_end(&mut events).await;
    assert!(tail
        .iter()
        .all(|e| !matches!(e, SessionEvent::RemoteBuffer { .. } | SessionEvent::MessageReceived { .. })));
    assert_eq!(alice.buffer().await, None);
}

#[tokio::test]
async fn dropping_the_handle_stops_the_loop() {
    let (transport, _sent, _closed) = MockTransport::new(vec![]);
    let (session, mut events) =
        RoomSession::join(transport, JoinParams::new("R1", "alice"), no_sync_timeout()).unwrap();
    drop(session);

    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        while events.recv().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok(), "event channel should close after drop");
}
