//! Session facade: one participation in one room.
//!
//! [`RoomSession`] is a thin handle that talks to a background session loop
//! over an unbounded command channel. The loop owns the transport and is the
//! only writer of room state (roster, buffer replica, chat log). Events are
//! delivered on a bounded channel returned from [`RoomSession::join`].
//!
//! # Example
//!
//! ```rust,ignore
//! let params = JoinParams::new("R1", "alice");
//! let (mut session, mut events) =
//!     RoomSession::connect("ws://localhost:5000/relay", params, SessionConfig::new()).await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::RemoteBuffer { code, .. } => editor.set_value(&code),
//!         SessionEvent::Notice(notice) => toast(notice.to_string()),
//!         SessionEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! session.leave().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, error, warn};

use crate::chat::{ChatChannel, ChatMessage, PanelVisibility};
use crate::connection::{ConnectionManager, ConnectionPolicy, ConnectionState};
use crate::error::{Result, SessionError};
use crate::event::{DisconnectReason, Notice, SessionEvent};
use crate::membership::{MembershipState, MembershipTracker};
use crate::protocol::{ClientMessage, Participant, RelayMessage, RoomId};
use crate::sync::{CodeSync, Received, SyncOutcome};
use crate::transport::Transport;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for a graceful leave.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default wait for a peer's snapshot after joining.
const DEFAULT_INITIAL_SYNC_TIMEOUT: Duration = Duration::from_secs(3);

// ── Configuration ───────────────────────────────────────────────────

/// Tuning for a [`RoomSession`].
///
/// # Example
///
/// ```
/// use coderoom_client::session::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::new()
///     .with_event_channel_capacity(64)
///     .with_initial_sync_timeout(Duration::from_secs(5));
/// assert_eq!(config.event_channel_capacity, 64);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer falls behind, events are dropped with a warning so
    /// the loop never blocks. `Disconnected` is always delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long [`RoomSession::leave`] waits for the loop to close the
    /// channel before aborting it. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// How long to wait for a peer's snapshot after joining before keeping
    /// the local buffer. Defaults to **3 seconds**.
    pub initial_sync_timeout: Duration,
    /// Retry policy used by [`RoomSession::connect`]. Defaults to fail-fast.
    pub connection_policy: ConnectionPolicy,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            initial_sync_timeout: DEFAULT_INITIAL_SYNC_TIMEOUT,
            connection_policy: ConnectionPolicy::fail_fast(),
        }
    }

    /// Set the event channel capacity. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_initial_sync_timeout(mut self, timeout: Duration) -> Self {
        self.initial_sync_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connection_policy(mut self, policy: ConnectionPolicy) -> Self {
        self.connection_policy = policy;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── JoinParams ──────────────────────────────────────────────────────

/// Who is joining which room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinParams {
    pub room_id: RoomId,
    /// Self-declared display name. Not authenticated.
    pub username: String,
}

impl JoinParams {
    pub fn new(room_id: impl Into<RoomId>, username: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            username: username.into(),
        }
    }

    /// Join a freshly generated room.
    pub fn new_room(username: impl Into<String>) -> Self {
        Self::new(generate_room_id(), username)
    }

    /// Check the request before anything goes on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidJoin`] if either field is blank.
    pub fn validate(&self) -> Result<()> {
        if self.room_id.trim().is_empty() || self.username.trim().is_empty() {
            return Err(SessionError::InvalidJoin(
                "room id and username are required",
            ));
        }
        Ok(())
    }
}

/// A fresh random room identifier.
pub fn generate_room_id() -> RoomId {
    uuid::Uuid::new_v4().to_string()
}

// ── Room model ──────────────────────────────────────────────────────

/// Everything the session knows about the room. Mutated only by the loop.
#[derive(Debug)]
struct RoomModel {
    membership: MembershipTracker,
    sync: CodeSync,
    chat: ChatChannel,
}

/// Output of applying one relay frame.
#[derive(Debug, Default)]
struct Reaction {
    events: Vec<SessionEvent>,
    outbound: Vec<ClientMessage>,
    /// This frame moved membership from `Joining` to `Joined`.
    first_roster: bool,
}

impl RoomModel {
    fn new(params: &JoinParams) -> Self {
        Self {
            membership: MembershipTracker::new(params.username.clone()),
            sync: CodeSync::new(params.room_id.clone()),
            chat: ChatChannel::new(params.username.clone()),
        }
    }

    fn on_relay(&mut self, msg: RelayMessage, panel_visible: bool) -> Reaction {
        let mut out = Reaction::default();
        if self.membership.state() == MembershipState::Left {
            debug!(kind = msg.kind(), "ignoring frame after leave");
            return out;
        }

        match msg {
            RelayMessage::Joined {
                clients,
                username,
                socket_id,
            } => {
                let Some(outcome) = self.membership.apply_joined(clients, username, socket_id)
                else {
                    return out;
                };
                out.events.push(SessionEvent::RosterUpdated {
                    participants: self.membership.roster().participants(),
                });
                if !outcome.is_self {
                    out.events.push(SessionEvent::Notice(Notice::ParticipantJoined {
                        username: outcome.joined.username.clone(),
                    }));
                }
                if let Some(frame) = self
                    .sync
                    .snapshot_for(&outcome.joined.socket_id, self.membership.local_socket_id())
                {
                    out.outbound.push(frame);
                }
                out.first_roster = outcome.first_roster;
                if outcome.first_roster && self.membership.is_alone() {
                    self.settle(SyncOutcome::Solo, &mut out);
                }
            }
            RelayMessage::SyncCode { code } => {
                let received = self.sync.receive_snapshot(code);
                self.push_received(received, &mut out);
            }
            RelayMessage::CodeChange { code } => {
                let received = self.sync.receive_edit(code);
                self.push_received(received, &mut out);
            }
            RelayMessage::Disconnected { socket_id, .. } => {
                if let Some(left) = self.membership.apply_departure(&socket_id) {
                    out.events.push(SessionEvent::ParticipantLeft {
                        socket_id: left.socket_id,
                        username: left.username.clone(),
                    });
                    out.events.push(SessionEvent::RosterUpdated {
                        participants: self.membership.roster().participants(),
                    });
                    out.events
                        .push(SessionEvent::Notice(Notice::ParticipantLeft {
                            username: left.username,
                        }));
                }
            }
            RelayMessage::ReceiveMessage { message, .. } => {
                let delivery = self.chat.receive(message, panel_visible);
                let from = delivery.message.username.clone();
                out.events.push(SessionEvent::MessageReceived {
                    message: delivery.message,
                    from_self: delivery.from_self,
                });
                if delivery.notify {
                    out.events
                        .push(SessionEvent::Notice(Notice::NewMessage { from }));
                }
            }
        }
        out
    }

    fn push_received(&self, received: Received, out: &mut Reaction) {
        let Received::Applied { origin, settled } = received else {
            return;
        };
        if let Some(code) = self.sync.buffer() {
            out.events.push(SessionEvent::RemoteBuffer {
                code: code.to_owned(),
                origin,
            });
        }
        if let Some(outcome) = settled {
            out.events.push(SessionEvent::InitialSyncSettled { outcome });
        }
    }

    fn settle(&mut self, outcome: SyncOutcome, out: &mut Reaction) {
        if let Some(outcome) = self.sync.settle(outcome) {
            out.events.push(SessionEvent::InitialSyncSettled { outcome });
        }
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the handle and the session loop.
struct SessionShared {
    params: JoinParams,
    connection: ConnectionManager,
    model: Mutex<RoomModel>,
    panel: PanelVisibility,
    /// Set once `leave()` starts. From then on relay frames are dropped
    /// unprocessed and only the terminal event is emitted.
    detached: AtomicBool,
}

impl SessionShared {
    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }
}

/// Work queued from the handle to the loop.
#[derive(Debug)]
enum Command {
    Frame(ClientMessage),
    Edit(String),
}

// ── Session handle ──────────────────────────────────────────────────

/// Handle to a live room session.
///
/// Created by [`RoomSession::join`] or [`RoomSession::connect`]. Outbound
/// operations queue work for the loop and return immediately.
pub struct RoomSession {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<SessionShared>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl RoomSession {
    /// Join a room over an already-connected transport.
    ///
    /// The `join` frame is the first thing the loop sends.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidJoin`] if `params` fails validation.
    pub fn join(
        transport: impl Transport,
        params: JoinParams,
        config: SessionConfig,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>)> {
        params.validate()?;
        let connection = ConnectionManager::new(config.connection_policy.clone());
        connection.mark_connected();
        Ok(Self::start(transport, params, config, connection))
    }

    /// Open a WebSocket channel to `endpoint` and join.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidJoin`] before connecting if `params` is
    /// invalid, or [`SessionError::Connection`] if the channel cannot be
    /// established. Both leave the caller in the pre-join state.
    #[cfg(feature = "transport-websocket")]
    pub async fn connect(
        endpoint: &str,
        params: JoinParams,
        config: SessionConfig,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>)> {
        params.validate()?;
        let connection = ConnectionManager::new(config.connection_policy.clone());
        let transport = connection.connect(endpoint).await?;
        Ok(Self::start(transport, params, config, connection))
    }

    fn start(
        transport: impl Transport,
        params: JoinParams,
        config: SessionConfig,
        connection: ConnectionManager,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        // tokio panics on a zero capacity.
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let join = ClientMessage::Join {
            room_id: params.room_id.clone(),
            username: params.username.clone(),
        };
        // Cannot fail: the receiver is alive in this scope.
        let _ = cmd_tx.send(Command::Frame(join));

        let shared = Arc::new(SessionShared {
            model: Mutex::new(RoomModel::new(&params)),
            params,
            connection,
            panel: PanelVisibility::default(),
            detached: AtomicBool::new(false),
        });

        let task = tokio::spawn(session_loop(
            transport,
            cmd_rx,
            event_tx,
            Arc::clone(&shared),
            shutdown_rx,
            config.initial_sync_timeout,
        ));

        let session = Self {
            cmd_tx,
            shared,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (session, event_rx)
    }

    // ── Outbound operations ─────────────────────────────────────────

    /// Report a local edit. The full buffer is broadcast to the room.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] once the session has ended.
    pub fn edit_buffer(&self, code: impl Into<String>) -> Result<()> {
        self.queue(Command::Edit(code.into()))
    }

    /// Send a chat message. Fire-and-forget: the message shows up in the log
    /// when the relay echoes it back.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EmptyMessage`] for blank text and
    /// [`SessionError::NotConnected`] once the session has ended.
    pub fn send_message(&self, text: impl Into<String>) -> Result<()> {
        let frame = crate::chat::compose(
            &self.shared.params.room_id,
            &self.shared.params.username,
            text,
        )?;
        self.queue(Command::Frame(frame))
    }

    /// Tell the session whether the chat panel is on screen. Incoming
    /// messages from others raise a notice only while it is hidden.
    pub fn set_chat_panel_visible(&self, visible: bool) {
        self.shared.panel.set(visible);
    }

    /// Leave the room: detach from relay events, then close the channel.
    ///
    /// Safe to call more than once; later calls do nothing. No session event
    /// other than the final `Disconnected` is produced once this starts.
    pub async fn leave(&mut self) {
        if self.task.is_none() && self.shutdown_tx.is_none() {
            return;
        }
        debug!(room = %self.shared.params.room_id, "leave requested");
        self.shared.detach();

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                    self.shared.model.lock().await.membership.leave();
                    if self.shared.connection.state() != ConnectionState::Errored {
                        self.shared.connection.mark_failed();
                    }
                }
            }
        }
    }

    // ── State accessors ─────────────────────────────────────────────

    pub fn room_id(&self) -> &str {
        &self.shared.params.room_id
    }

    pub fn username(&self) -> &str {
        &self.shared.params.username
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    /// Receiver that observes connection state changes.
    pub fn connection_updates(&self) -> watch::Receiver<ConnectionState> {
        self.shared.connection.subscribe()
    }

    pub async fn membership_state(&self) -> MembershipState {
        self.shared.model.lock().await.membership.state()
    }

    /// Current roster, sorted by socket id.
    pub async fn participants(&self) -> Vec<Participant> {
        self.shared.model.lock().await.membership.roster().participants()
    }

    /// Current local replica of the shared buffer.
    pub async fn buffer(&self) -> Option<String> {
        self.shared.model.lock().await.sync.buffer().map(str::to_owned)
    }

    /// Chat log in arrival order.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.shared.model.lock().await.chat.messages().to_vec()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn queue(&self, cmd: Command) -> Result<()> {
        if self.shared.is_detached() {
            return Err(SessionError::NotConnected);
        }
        match self.shared.connection.state() {
            ConnectionState::Connected => {}
            _ => return Err(SessionError::NotConnected),
        }
        self.cmd_tx.send(cmd).map_err(|_| SessionError::NotConnected)
    }
}

impl std::fmt::Debug for RoomSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSession")
            .field("room_id", &self.shared.params.room_id)
            .field("username", &self.shared.params.username)
            .field("connection", &self.connection_state())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        // No executor to drive a graceful close here; abort instead.
        self.shared.detach();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

/// Background loop multiplexing commands, relay frames, the initial-sync
/// deadline and the leave signal.
///
/// Exits when:
/// - `leave()` signals shutdown or the handle is dropped
/// - the relay closes the channel
/// - a transport error occurs
async fn session_loop(
    mut transport: impl Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<SessionEvent>,
    shared: Arc<SessionShared>,
    mut shutdown_rx: oneshot::Receiver<()>,
    initial_sync_timeout: Duration,
) {
    debug!(room = %shared.params.room_id, "session loop started");
    emit_event(&event_tx, &shared, SessionEvent::Connected);

    // Armed when the first roster arrives; the handshake starts there.
    let sync_deadline = tokio::time::sleep(initial_sync_timeout);
    tokio::pin!(sync_deadline);
    let mut sync_pending = false;

    loop {
        tokio::select! {
            // Leave takes priority over pending work.
            biased;

            _ = &mut shutdown_rx => {
                debug!("leave signal received");
                end_session(&mut transport, &event_tx, &shared, DisconnectReason::Left).await;
                break;
            }

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    debug!("command channel closed, ending session");
                    end_session(&mut transport, &event_tx, &shared, DisconnectReason::Left).await;
                    break;
                };
                let frame = match cmd {
                    Command::Frame(frame) => frame,
                    Command::Edit(code) => shared.model.lock().await.sync.local_edit(code),
                };
                if let Err(e) = send_frame(&mut transport, &frame).await {
                    error!("transport send error: {e}");
                    fail_session(&mut transport, &event_tx, &shared, e.to_string()).await;
                    break;
                }
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        if shared.is_detached() {
                            debug!("dropping relay frame after detach");
                            continue;
                        }
                        let msg = match serde_json::from_str::<RelayMessage>(&text) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!(len = text.len(), "dropping malformed relay frame: {e}");
                                continue;
                            }
                        };
                        debug!(kind = msg.kind(), "relay frame received");

                        let (reaction, awaiting) = {
                            let mut model = shared.model.lock().await;
                            let reaction = model.on_relay(msg, shared.panel.is_visible());
                            (reaction, model.sync.is_awaiting_initial())
                        };
                        if !awaiting {
                            sync_pending = false;
                        } else if reaction.first_roster {
                            sync_deadline
                                .as_mut()
                                .reset(tokio::time::Instant::now() + initial_sync_timeout);
                            sync_pending = true;
                        }
                        let mut failed = None;
                        for frame in &reaction.outbound {
                            if let Err(e) = send_frame(&mut transport, frame).await {
                                failed = Some(e);
                                break;
                            }
                        }
                        for event in reaction.events {
                            emit_event(&event_tx, &shared, event);
                        }
                        if let Some(e) = failed {
                            error!("transport send error: {e}");
                            fail_session(&mut transport, &event_tx, &shared, e.to_string()).await;
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        fail_session(&mut transport, &event_tx, &shared, e.to_string()).await;
                        break;
                    }
                    None => {
                        debug!("relay closed the channel");
                        end_session(
                            &mut transport,
                            &event_tx,
                            &shared,
                            DisconnectReason::RelayClosed,
                        ).await;
                        break;
                    }
                }
            }

            _ = &mut sync_deadline, if sync_pending => {
                sync_pending = false;
                let settled = shared.model.lock().await.sync.settle(SyncOutcome::TimedOut);
                if let Some(outcome) = settled {
                    debug!("no peer snapshot within {initial_sync_timeout:?}");
                    emit_event(&event_tx, &shared, SessionEvent::InitialSyncSettled { outcome });
                }
            }
        }
    }

    debug!("session loop exited");
}

async fn send_frame(transport: &mut impl Transport, frame: &ClientMessage) -> Result<()> {
    let json = serde_json::to_string(frame)?;
    debug!(kind = frame.kind(), "sending client frame");
    transport.send(json).await
}

/// Detach, close the channel and emit the terminal event.
async fn end_session(
    transport: &mut impl Transport,
    event_tx: &mpsc::Sender<SessionEvent>,
    shared: &SessionShared,
    reason: DisconnectReason,
) {
    shared.detach();
    shared.model.lock().await.membership.leave();
    shared.connection.disconnect(transport).await;
    emit_disconnected(event_tx, reason).await;
}

/// Fail-fast teardown after a channel error.
async fn fail_session(
    transport: &mut impl Transport,
    event_tx: &mpsc::Sender<SessionEvent>,
    shared: &SessionShared,
    reason: String,
) {
    shared.connection.mark_failed();
    // Must be emitted before detaching.
    emit_event(event_tx, shared, SessionEvent::Notice(Notice::ConnectionFailed));
    end_session(
        transport,
        event_tx,
        shared,
        DisconnectReason::ConnectionFailed(reason),
    )
    .await;
}

/// Emit an event without blocking. Drops it with a warning if the channel is
/// full, and silently once the session is detached.
fn emit_event(event_tx: &mpsc::Sender<SessionEvent>, shared: &SessionShared, event: SessionEvent) {
    if shared.is_detached() {
        debug!("session detached, suppressing event");
        return;
    }
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit the terminal event, waiting for room if needed. It is always the
/// last event on the channel and must not be dropped.
async fn emit_disconnected(event_tx: &mpsc::Sender<SessionEvent>, reason: DisconnectReason) {
    if event_tx
        .send(SessionEvent::Disconnected { reason })
        .await
        .is_err()
    {
        debug!("event channel closed, receiver dropped");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

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
    use crate::protocol::ChatPayload;
    use crate::sync::BufferOrigin;

    fn p(id: &str, name: &str) -> Participant {
        Participant::new(id, name)
    }

    fn joined(clients: Vec<Participant>, name: &str, id: &str) -> RelayMessage {
        RelayMessage::Joined {
            clients,
            username: name.into(),
            socket_id: id.into(),
        }
    }

    fn notices(reaction: &Reaction) -> Vec<String> {
        reaction
            .events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Notice(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.initial_sync_timeout, Duration::from_secs(3));
        assert_eq!(config.connection_policy, ConnectionPolicy::fail_fast());
    }

    #[test]
    fn event_channel_capacity_is_clamped_to_one() {
        let config = SessionConfig::new().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[test]
    fn join_params_require_room_and_name() {
        assert!(JoinParams::new("R1", "alice").validate().is_ok());
        assert!(matches!(
            JoinParams::new("", "alice").validate(),
            Err(SessionError::InvalidJoin(_))
        ));
        assert!(matches!(
            JoinParams::new("R1", "   ").validate(),
            Err(SessionError::InvalidJoin(_))
        ));
    }

    #[test]
    fn generated_room_ids_are_unique_uuids() {
        let a = generate_room_id();
        let b = generate_room_id();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
        assert!(JoinParams::new_room("alice").validate().is_ok());
    }

    #[test]
    fn existing_member_unicasts_buffer_and_announces_newcomer() {
        let mut model = RoomModel::new(&JoinParams::new("R1", "alice"));
        model.on_relay(joined(vec![p("a", "alice")], "alice", "a"), false);
        model.sync.local_edit("print(1)".into());

        let reaction = model.on_relay(joined(vec![p("a", "alice"), p("b", "bob")], "bob", "b"), false);

        assert_eq!(
            reaction.outbound,
            vec![ClientMessage::SyncCode {
                code: "print(1)".into(),
                socket_id: "b".into(),
            }]
        );
        assert_eq!(notices(&reaction), vec!["bob joined the room."]);
    }

    #[test]
    fn own_join_is_silent() {
        let mut model = RoomModel::new(&JoinParams::new("R1", "bob"));
        let reaction = model.on_relay(joined(vec![p("a", "alice"), p("b", "bob")], "bob", "b"), false);
        assert!(notices(&reaction).is_empty());
        assert!(reaction.outbound.is_empty());
        assert!(matches!(
            reaction.events[0],
            SessionEvent::RosterUpdated { ref participants } if participants.len() == 2
        ));
    }

    #[test]
    fn solo_join_settles_immediately() {
        let mut model = RoomModel::new(&JoinParams::new("R1", "alice"));
        let reaction = model.on_relay(joined(vec![p("a", "alice")], "alice", "a"), false);
        assert!(reaction.events.contains(&SessionEvent::InitialSyncSettled {
            outcome: SyncOutcome::Solo
        }));
        assert!(!model.sync.is_awaiting_initial());
    }

    #[test]
    fn newcomer_applies_first_snapshot_only() {
        let mut model = RoomModel::new(&JoinParams::new("R1", "bob"));
        model.on_relay(joined(vec![p("a", "alice"), p("c", "carol"), p("b", "bob")], "bob", "b"), false);

        let first = model.on_relay(RelayMessage::SyncCode { code: Some("print(1)".into()) }, false);
        assert_eq!(
            first.events,
            vec![
                SessionEvent::RemoteBuffer {
                    code: "print(1)".into(),
                    origin: BufferOrigin::InitialSync,
                },
                SessionEvent::InitialSyncSettled {
                    outcome: SyncOutcome::FromPeer
                },
            ]
        );

        let second = model.on_relay(RelayMessage::SyncCode { code: Some("print(2)".into()) }, false);
        assert!(second.events.is_empty());
        assert_eq!(model.sync.buffer(), Some("print(1)"));
    }

    #[test]
    fn departure_of_unknown_socket_is_silent() {
        let mut model = RoomModel::new(&JoinParams::new("R1", "alice"));
        model.on_relay(joined(vec![p("a", "alice")], "alice", "a"), false);
        let reaction = model.on_relay(
            RelayMessage::Disconnected {
                socket_id: "ghost".into(),
                username: "ghost".into(),
            },
            false,
        );
        assert!(reaction.events.is_empty());
    }

    #[test]
    fn departure_updates_roster_and_notifies() {
        let mut model = RoomModel::new(&JoinParams::new("R1", "alice"));
        model.on_relay(joined(vec![p("a", "alice"), p("b", "bob")], "alice", "a"), false);
        let reaction = model.on_relay(
            RelayMessage::Disconnected {
                socket_id: "b".into(),
                username: "bob".into(),
            },
            false,
        );
        assert_eq!(notices(&reaction), vec!["bob left the room."]);
        assert_eq!(model.membership.roster().participants(), vec![p("a", "alice")]);
    }

    #[test]
    fn chat_notice_depends_on_panel_visibility() {
        let mut model = RoomModel::new(&JoinParams::new("R1", "bob"));
        let payload = ChatPayload {
            username: "alice".into(),
            message: "hello".into(),
        };

        let collapsed = model.on_relay(
            RelayMessage::ReceiveMessage {
                room_id: Some("R1".into()),
                message: payload.clone(),
            },
            false,
        );
        assert_eq!(notices(&collapsed), vec!["New message from alice"]);

        let expanded = model.on_relay(
            RelayMessage::ReceiveMessage {
                room_id: None,
                message: payload,
            },
            true,
        );
        assert!(notices(&expanded).is_empty());
        assert_eq!(model.chat.messages().len(), 2);
    }

    #[test]
    fn no_self_unicast_when_own_join_arrives_second() {
        let mut model = RoomModel::new(&JoinParams::new("R1", "bob"));
        let first = model.on_relay(
            joined(vec![p("a", "alice"), p("c", "carol")], "carol", "c"),
            false,
        );
        assert!(first.first_roster);
        let _ = model.sync.local_edit("draft".into());

        let own = model.on_relay(
            joined(vec![p("a", "alice"), p("c", "carol"), p("b", "bob")], "bob", "b"),
            false,
        );
        assert!(!own.first_roster);
        assert!(own.outbound.is_empty());
        assert_eq!(model.membership.local_socket_id(), Some("b"));
    }

    #[test]
    fn only_the_first_roster_is_flagged() {
        let mut model = RoomModel::new(&JoinParams::new("R1", "alice"));
        let edit = RelayMessage::CodeChange { code: "x".into() };
        assert!(!model.on_relay(edit, false).first_roster);

        let own = joined(vec![p("a", "alice")], "alice", "a");
        assert!(model.on_relay(own, false).first_roster);

        let bob = joined(vec![p("a", "alice"), p("b", "bob")], "bob", "b");
        assert!(!model.on_relay(bob, false).first_roster);
    }

    #[test]
    fn frames_after_leave_are_no_ops() {
        let mut model = RoomModel::new(&JoinParams::new("R1", "alice"));
        model.membership.leave();
        let reaction = model.on_relay(RelayMessage::CodeChange { code: "x".into() }, false);
        assert!(reaction.events.is_empty());
        assert!(reaction.outbound.is_empty());
        assert_eq!(model.sync.buffer(), None);
    }
}
