//! Code buffer synchronization.
//!
//! There is no central durable store for the buffer. When a member joins, the
//! relay broadcasts the new roster and every existing member unicasts its
//! full buffer to the newcomer's socket id. The newcomer applies whichever
//! snapshot arrives first and discards the rest. After that, every local edit
//! is broadcast to the room as a full-buffer replace.

use tracing::debug;

use crate::protocol::{ClientMessage, RoomId, SocketId};

/// How the initial sync of a join settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A peer's snapshot was applied.
    FromPeer,
    /// The local member is alone in the room; its own buffer stands.
    Solo,
    /// No peer answered within the configured wait; the local buffer stands.
    TimedOut,
}

/// Where a remotely received buffer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOrigin {
    /// The snapshot a peer unicast in answer to our join.
    InitialSync,
    /// A peer's broadcast after one of its edits.
    PeerEdit,
}

/// Result of feeding one inbound buffer frame to the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// The buffer was replaced. `settled` is set when this also completed the
    /// initial sync.
    Applied {
        origin: BufferOrigin,
        settled: Option<SyncOutcome>,
    },
    /// A duplicate or empty snapshot that was dropped.
    Discarded,
}

/// Replica of the shared buffer plus the join handshake state.
#[derive(Debug, Clone)]
pub struct CodeSync {
    room_id: RoomId,
    buffer: Option<String>,
    awaiting_initial: bool,
}

impl CodeSync {
    /// Start a handshake for a member that has just sent `join`.
    pub fn new(room_id: impl Into<RoomId>) -> Self {
        Self {
            room_id: room_id.into(),
            buffer: None,
            awaiting_initial: true,
        }
    }

    /// Current local replica, if any text has been set or received.
    pub fn buffer(&self) -> Option<&str> {
        self.buffer.as_deref()
    }

    /// Returns `true` until the initial sync has settled.
    pub fn is_awaiting_initial(&self) -> bool {
        self.awaiting_initial
    }

    /// Record a local edit and produce the room broadcast for it.
    pub fn local_edit(&mut self, code: String) -> ClientMessage {
        self.buffer = Some(code.clone());
        ClientMessage::CodeChange {
            room_id: self.room_id.clone(),
            code,
        }
    }

    /// Snapshot to unicast to a member that just joined.
    ///
    /// Returns `None` when there is nothing to share or the joiner is us.
    pub fn snapshot_for(
        &self,
        joined: &str,
        local_socket_id: Option<&str>,
    ) -> Option<ClientMessage> {
        if local_socket_id == Some(joined) {
            return None;
        }
        let code = self.buffer.clone()?;
        Some(ClientMessage::SyncCode {
            code,
            socket_id: SocketId::from(joined),
        })
    }

    /// Apply a `sync-code` unicast.
    ///
    /// While the initial sync is pending the first snapshot wins. Once it has
    /// settled (timed out or solo), a snapshot is still taken if the buffer is
    /// empty, since a timeout is not a received sync.
    pub fn receive_snapshot(&mut self, code: Option<String>) -> Received {
        let Some(code) = code else {
            debug!("peer had no buffer to share");
            return Received::Discarded;
        };
        if !self.awaiting_initial && self.buffer.is_some() {
            debug!("discarding duplicate initial snapshot");
            return Received::Discarded;
        }
        self.buffer = Some(code);
        let settled = self.settle(SyncOutcome::FromPeer);
        Received::Applied {
            origin: BufferOrigin::InitialSync,
            settled,
        }
    }

    /// Apply a `code-change` broadcast from a peer.
    ///
    /// A broadcast is newer than any snapshot still in flight, so it also
    /// settles a pending initial sync.
    pub fn receive_edit(&mut self, code: String) -> Received {
        self.buffer = Some(code);
        let settled = self.settle(SyncOutcome::FromPeer);
        Received::Applied {
            origin: BufferOrigin::PeerEdit,
            settled,
        }
    }

    /// Settle the initial sync without a snapshot. Returns the outcome if this
    /// call did the settling.
    pub fn settle(&mut self, outcome: SyncOutcome) -> Option<SyncOutcome> {
        if !self.awaiting_initial {
            return None;
        }
        self.awaiting_initial = false;
        debug!(?outcome, "initial sync settled");
        Some(outcome)
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

    #[test]
    fn first_snapshot_wins_and_second_is_discarded() {
        let mut sync = CodeSync::new("R1");
        assert_eq!(
            sync.receive_snapshot(Some("print(1)".into())),
            Received::Applied {
                origin: BufferOrigin::InitialSync,
                settled: Some(SyncOutcome::FromPeer),
            }
        );
        assert_eq!(
            sync.receive_snapshot(Some("print(2)".into())),
            Received::Discarded
        );
        assert_eq!(sync.buffer(), Some("print(1)"));
    }

    #[test]
    fn null_snapshot_does_not_consume_the_slot() {
        let mut sync = CodeSync::new("R1");
        assert_eq!(sync.receive_snapshot(None), Received::Discarded);
        assert!(sync.is_awaiting_initial());
        sync.receive_snapshot(Some("x = 1".into()));
        assert_eq!(sync.buffer(), Some("x = 1"));
    }

    #[test]
    fn no_snapshot_offered_without_a_buffer() {
        let sync = CodeSync::new("R1");
        assert!(sync.snapshot_for("b", Some("a")).is_none());
    }

    #[test]
    fn snapshot_is_unicast_to_the_joiner() {
        let mut sync = CodeSync::new("R1");
        sync.local_edit("print(1)".into());
        let msg = sync.snapshot_for("b", Some("a")).unwrap();
        assert_eq!(
            msg,
            ClientMessage::SyncCode {
                code: "print(1)".into(),
                socket_id: "b".into(),
            }
        );
    }

    #[test]
    fn no_snapshot_to_ourselves() {
        let mut sync = CodeSync::new("R1");
        sync.local_edit("print(1)".into());
        assert!(sync.snapshot_for("a", Some("a")).is_none());
    }

    #[test]
    fn local_edit_broadcasts_full_buffer_to_room() {
        let mut sync = CodeSync::new("R1");
        let msg = sync.local_edit("fn main() {}".into());
        assert_eq!(
            msg,
            ClientMessage::CodeChange {
                room_id: "R1".into(),
                code: "fn main() {}".into(),
            }
        );
        assert_eq!(sync.buffer(), Some("fn main() {}"));
    }

    #[test]
    fn peer_edit_settles_pending_sync_and_blocks_stale_snapshot() {
        let mut sync = CodeSync::new("R1");
        match sync.receive_edit("v2".into()) {
            Received::Applied { origin, settled } => {
                assert_eq!(origin, BufferOrigin::PeerEdit);
                assert_eq!(settled, Some(SyncOutcome::FromPeer));
            }
            Received::Discarded => panic!("edit must apply"),
        }
        assert_eq!(sync.receive_snapshot(Some("v1".into())), Received::Discarded);
        assert_eq!(sync.buffer(), Some("v2"));
    }

    #[test]
    fn settle_happens_once() {
        let mut sync = CodeSync::new("R1");
        assert_eq!(sync.settle(SyncOutcome::Solo), Some(SyncOutcome::Solo));
        assert_eq!(sync.settle(SyncOutcome::TimedOut), None);
    }

    #[test]
    fn timed_out_join_keeps_local_buffer() {
        let mut sync = CodeSync::new("R1");
        sync.local_edit("draft".into());
        assert_eq!(sync.settle(SyncOutcome::TimedOut), Some(SyncOutcome::TimedOut));
        assert_eq!(sync.buffer(), Some("draft"));
        assert_eq!(sync.receive_snapshot(Some("late".into())), Received::Discarded);
    }

    #[test]
    fn late_snapshot_fills_empty_buffer_after_timeout() {
        let mut sync = CodeSync::new("R1");
        sync.settle(SyncOutcome::TimedOut);
        assert_eq!(
            sync.receive_snapshot(Some("print(1)".into())),
            Received::Applied {
                origin: BufferOrigin::InitialSync,
                settled: None,
            }
        );
        assert_eq!(sync.buffer(), Some("print(1)"));
        assert_eq!(sync.receive_snapshot(Some("print(2)".into())), Received::Discarded);
    }
}
