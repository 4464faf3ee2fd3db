//! Room membership tracking.
//!
//! [`MembershipTracker`] keeps the local view of `{socketId → username}` for
//! the current room. It is driven entirely by relay events: a `joined`
//! broadcast replaces the whole roster (it is a total snapshot, not a diff)
//! and a `disconnected` event removes exactly one entry.

use std::collections::HashMap;

use tracing::debug;

use crate::protocol::{Participant, SocketId};

/// Lifecycle of the local member's participation in the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    /// `join` was sent; no roster seen yet.
    Joining,
    /// At least one roster snapshot has been applied.
    Joined,
    /// Terminal. Further relay events are ignored.
    Left,
}

/// Current room membership keyed by relay-assigned socket id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    members: HashMap<SocketId, String>,
}

impl Roster {
    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if nobody is in the room.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Display name for `socket_id`, if present.
    pub fn username(&self, socket_id: &str) -> Option<&str> {
        self.members.get(socket_id).map(String::as_str)
    }

    /// Returns `true` if `socket_id` is in the roster.
    pub fn contains(&self, socket_id: &str) -> bool {
        self.members.contains_key(socket_id)
    }

    /// Snapshot of every member, sorted by socket id for stable output.
    pub fn participants(&self) -> Vec<Participant> {
        let mut out: Vec<Participant> = self
            .members
            .iter()
            .map(|(id, name)| Participant::new(id.clone(), name.clone()))
            .collect();
        out.sort_by(|a, b| a.socket_id.cmp(&b.socket_id));
        out
    }

    fn replace(&mut self, clients: Vec<Participant>) {
        // Later duplicates of one socket id win.
        self.members = clients
            .into_iter()
            .map(|p| (p.socket_id, p.username))
            .collect();
    }

    fn remove(&mut self, socket_id: &str) -> Option<String> {
        self.members.remove(socket_id)
    }
}

/// What a `joined` broadcast means for the local member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The member that just joined.
    pub joined: Participant,
    /// `true` when the joiner's name equals the local username. Such joins
    /// never produce a user-visible notice.
    pub is_self: bool,
    /// `true` when this broadcast moved the tracker from `Joining` to `Joined`.
    pub first_roster: bool,
}

/// Membership state machine for one session.
#[derive(Debug, Clone)]
pub struct MembershipTracker {
    local_username: String,
    local_socket_id: Option<SocketId>,
    state: MembershipState,
    roster: Roster,
}

impl MembershipTracker {
    /// Start tracking for a member that has just sent `join`.
    pub fn new(local_username: impl Into<String>) -> Self {
        Self {
            local_username: local_username.into(),
            local_socket_id: None,
            state: MembershipState::Joining,
            roster: Roster::default(),
        }
    }

    pub fn state(&self) -> MembershipState {
        self.state
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn local_username(&self) -> &str {
        &self.local_username
    }

    /// Socket id of the local member, once it could be inferred.
    ///
    /// Inferred from the first `joined` broadcast naming the local username,
    /// even if another member's broadcast arrived before it. Only used to
    /// avoid unicasting to ourselves.
    pub fn local_socket_id(&self) -> Option<&str> {
        self.local_socket_id.as_deref()
    }

    /// Returns `true` when nobody but the local member is in the roster.
    ///
    /// Uses the inferred local socket id when known, the username otherwise.
    pub fn is_alone(&self) -> bool {
        self.roster.members.iter().all(|(id, name)| match &self.local_socket_id {
            Some(local) => id == local,
            None => name == &self.local_username,
        })
    }

    /// Returns `true` if `username` is the local member's declared name.
    pub fn is_local(&self, username: &str) -> bool {
        username == self.local_username
    }

    /// Apply a `joined` broadcast. Returns `None` once the tracker has left.
    pub fn apply_joined(
        &mut self,
        clients: Vec<Participant>,
        username: String,
        socket_id: SocketId,
    ) -> Option<JoinOutcome> {
        if self.state == MembershipState::Left {
            debug!(socket_id = %socket_id, "ignoring joined after leave");
            return None;
        }

        let is_self = self.is_local(&username);
        let first_roster = self.state == MembershipState::Joining;
        if is_self && self.local_socket_id.is_none() {
            self.local_socket_id = Some(socket_id.clone());
        }

        self.roster.replace(clients);
        self.state = MembershipState::Joined;
        debug!(
            members = self.roster.len(),
            joined = %username,
            "roster replaced"
        );

        Some(JoinOutcome {
            joined: Participant::new(socket_id, username),
            is_self,
            first_roster,
        })
    }

    /// Apply a `disconnected` event.
    ///
    /// Returns the removed member, or `None` if the socket id was unknown
    /// (a no-op) or the tracker has left.
    pub fn apply_departure(&mut self, socket_id: &str) -> Option<Participant> {
        if self.state == MembershipState::Left {
            return None;
        }
        let username = self.roster.remove(socket_id)?;
        debug!(socket_id = %socket_id, username = %username, "member removed");
        Some(Participant::new(socket_id, username))
    }

    /// Enter the terminal state. Idempotent.
    pub fn leave(&mut self) {
        if self.state != MembershipState::Left {
            debug!("membership tracker left");
            self.state = MembershipState::Left;
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

    fn p(id: &str, name: &str) -> Participant {
        Participant::new(id, name)
    }

    #[test]
    fn first_roster_moves_to_joined_and_learns_own_socket() {
        let mut tracker = MembershipTracker::new("bob");
        assert_eq!(tracker.state(), MembershipState::Joining);

        let outcome = tracker
            .apply_joined(vec![p("a", "alice"), p("b", "bob")], "bob".into(), "b".into())
            .unwrap();

        assert!(outcome.is_self);
        assert!(outcome.first_roster);
        assert_eq!(tracker.state(), MembershipState::Joined);
        assert_eq!(tracker.local_socket_id(), Some("b"));
        assert_eq!(tracker.roster().len(), 2);
    }

    #[test]
    fn roster_is_replaced_not_merged() {
        let mut tracker = MembershipTracker::new("alice");
        tracker.apply_joined(vec![p("a", "alice"), p("x", "xavier")], "alice".into(), "a".into());
        tracker.apply_joined(vec![p("a", "alice"), p("b", "bob")], "bob".into(), "b".into());

        let roster = tracker.roster();
        assert!(!roster.contains("x"));
        assert_eq!(roster.participants(), vec![p("a", "alice"), p("b", "bob")]);
    }

    #[test]
    fn relay_username_wins_over_previous_entry() {
        let mut tracker = MembershipTracker::new("alice");
        tracker.apply_joined(vec![p("a", "alice"), p("b", "bobby")], "bobby".into(), "b".into());
        tracker.apply_joined(vec![p("a", "alice"), p("b", "bob")], "bob".into(), "b".into());
        assert_eq!(tracker.roster().username("b"), Some("bob"));
    }

    #[test]
    fn alone_until_someone_else_is_listed() {
        let mut tracker = MembershipTracker::new("alice");
        tracker.apply_joined(vec![p("a", "alice")], "alice".into(), "a".into());
        assert!(tracker.is_alone());
        tracker.apply_joined(vec![p("a", "alice"), p("b", "bob")], "bob".into(), "b".into());
        assert!(!tracker.is_alone());
        tracker.apply_departure("b");
        assert!(tracker.is_alone());
    }

    #[test]
    fn other_member_join_is_not_self() {
        let mut tracker = MembershipTracker::new("alice");
        tracker.apply_joined(vec![p("a", "alice")], "alice".into(), "a".into());
        let outcome = tracker
            .apply_joined(vec![p("a", "alice"), p("b", "bob")], "bob".into(), "b".into())
            .unwrap();
        assert!(!outcome.is_self);
        assert!(!outcome.first_roster);
        assert_eq!(outcome.joined, p("b", "bob"));
    }

    #[test]
    fn own_socket_not_learned_from_someone_else() {
        let mut tracker = MembershipTracker::new("carol");
        tracker.apply_joined(vec![p("a", "alice")], "alice".into(), "a".into());
        assert_eq!(tracker.local_socket_id(), None);
    }

    #[test]
    fn departure_removes_exactly_one_entry() {
        let mut tracker = MembershipTracker::new("alice");
        tracker.apply_joined(
            vec![p("a", "alice"), p("b", "bob"), p("c", "carol")],
            "carol".into(),
            "c".into(),
        );
        let removed = tracker.apply_departure("b").unwrap();
        assert_eq!(removed, p("b", "bob"));
        assert_eq!(tracker.roster().participants(), vec![p("a", "alice"), p("c", "carol")]);
    }

    #[test]
    fn unknown_departure_is_a_no_op() {
        let mut tracker = MembershipTracker::new("alice");
        tracker.apply_joined(vec![p("a", "alice")], "alice".into(), "a".into());
        let before = tracker.roster().clone();
        assert!(tracker.apply_departure("zzz").is_none());
        assert!(tracker.apply_departure("zzz").is_none());
        assert_eq!(tracker.roster(), &before);
    }

    #[test]
    fn events_after_leave_are_ignored() {
        let mut tracker = MembershipTracker::new("alice");
        tracker.apply_joined(vec![p("a", "alice"), p("b", "bob")], "bob".into(), "b".into());
        tracker.leave();
        tracker.leave();

        assert_eq!(tracker.state(), MembershipState::Left);
        assert!(tracker
            .apply_joined(vec![p("c", "carol")], "carol".into(), "c".into())
            .is_none());
        assert!(tracker.apply_departure("b").is_none());
        assert_eq!(tracker.roster().len(), 2);
    }

    #[test]
    fn roster_converges_to_last_snapshot_minus_later_departures() {
        let mut tracker = MembershipTracker::new("alice");
        let events: Vec<(bool, Vec<Participant>, &str)> = vec![
            (true, vec![p("a", "alice")], "a"),
            (true, vec![p("a", "alice"), p("b", "bob")], "b"),
            (false, vec![], "a"),
            (true, vec![p("b", "bob"), p("c", "carol"), p("d", "dave")], "d"),
            (false, vec![], "c"),
            (false, vec![], "c"),
            (false, vec![], "q"),
        ];
        for (is_join, clients, id) in events {
            if is_join {
                let name = clients
                    .iter()
                    .find(|c| c.socket_id == id)
                    .map(|c| c.username.clone())
                    .unwrap();
                tracker.apply_joined(clients, name, id.into());
            } else {
                tracker.apply_departure(id);
            }
        }
        assert_eq!(tracker.roster().participants(), vec![p("b", "bob"), p("d", "dave")]);
    }

    #[test]
    fn own_socket_learned_when_another_join_arrives_first() {
        let mut tracker = MembershipTracker::new("bob");
        tracker.apply_joined(vec![p("a", "alice"), p("c", "carol")], "carol".into(), "c".into());
        assert_eq!(tracker.local_socket_id(), None);

        let outcome = tracker
            .apply_joined(
                vec![p("a", "alice"), p("c", "carol"), p("b", "bob")],
                "bob".into(),
                "b".into(),
            )
            .unwrap();
        assert!(outcome.is_self);
        assert!(!outcome.first_roster);
        assert_eq!(tracker.local_socket_id(), Some("b"));

        tracker.apply_joined(
            vec![p("a", "alice"), p("b", "bob"), p("b2", "bob")],
            "bob".into(),
            "b2".into(),
        );
        assert_eq!(tracker.local_socket_id(), Some("b"));
    }
}
