//! # CodeRoom Client
//!
//! Async client for collaborative coding rooms: a shared code buffer and a
//! chat channel kept in sync through a stateless relay.
//!
//! Every frame goes through the relay. The relay keeps no buffer of its own,
//! so a member who joins late is brought up to date by peers, each of which
//! unicasts its current buffer to the newcomer. The first snapshot wins.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] for any text channel
//! - **WebSocket built-in**: the default `transport-websocket` feature provides
//!   [`WebSocketTransport`] and [`RoomSession::connect`]
//! - **Event-driven**: a [`RoomSession`] delivers typed [`SessionEvent`]s on a
//!   bounded channel
//! - **Remote execution**: the optional `execution-service` feature adds an
//!   HTTP client for running the shared buffer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), coderoom_client::SessionError> {
//! use coderoom_client::{JoinParams, RoomSession, SessionConfig, SessionEvent};
//!
//! let params = JoinParams::new("R1", "alice");
//! let (mut session, mut events) =
//!     RoomSession::connect("ws://localhost:5000/relay", params, SessionConfig::new()).await?;
//!
//! session.send_message("hello")?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::Notice(notice) => println!("{notice}"),
//!         SessionEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! session.leave().await;
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod connection;
pub mod error;
pub mod event;
#[cfg(feature = "execution-service")]
pub mod execution;
pub mod membership;
pub mod protocol;
pub mod session;
pub mod sync;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use chat::ChatMessage;
pub use connection::{ConnectionPolicy, ConnectionState};
pub use error::{Result, SessionError};
pub use event::{DisconnectReason, Notice, SessionEvent};
pub use membership::MembershipState;
pub use protocol::{ClientMessage, Participant, RelayMessage};
pub use session::{generate_room_id, JoinParams, RoomSession, SessionConfig};
pub use sync::{BufferOrigin, SyncOutcome};
pub use transport::Transport;

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
