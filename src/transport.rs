//! Transport abstraction for the relay channel.
//!
//! The [`Transport`] trait is a bidirectional text message channel between
//! the client and the relay. Every relay frame is one JSON text message, so
//! implementations handle framing internally (WebSocket frames, length
//! prefixes, in-memory queues for tests).
//!
//! # Connection Setup
//!
//! Connection setup is not part of this trait. Establish the channel with
//! [`crate::connection`] (or any other means), then hand the connected
//! transport to [`RoomSession::join`](crate::session::RoomSession::join).
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use coderoom_client::error::SessionError;
//! use coderoom_client::transport::Transport;
//! use tokio::sync::mpsc;
//!
//! struct ChannelTransport {
//!     outgoing: mpsc::UnboundedSender<String>,
//!     incoming: mpsc::UnboundedReceiver<String>,
//! }
//!
//! #[async_trait]
//! impl Transport for ChannelTransport {
//!     async fn send(&mut self, message: String) -> Result<(), SessionError> {
//!         self.outgoing
//!             .send(message)
//!             .map_err(|e| SessionError::TransportSend(e.to_string()))
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, SessionError>> {
//!         self.incoming.recv().await.map(Ok)
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SessionError> {
//!         self.incoming.close();
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SessionError;

/// A bidirectional text message transport to the relay.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON frame and
/// each call to [`recv`](Transport::recv) returns one.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe: the session loop polls it
/// inside `tokio::select!`, and a cancelled call must not lose a frame.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text frame to the relay.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportSend`] if the frame could not be sent.
    async fn send(&mut self, message: String) -> Result<(), SessionError>;

    /// Receive the next JSON text frame from the relay.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: the channel failed (e.g. [`SessionError::TransportReceive`])
    /// - `None`: the relay closed the channel cleanly
    async fn recv(&mut self) -> Option<Result<String, SessionError>>;

    /// Close the channel gracefully.
    ///
    /// Must be idempotent: closing an already-closed transport returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations still
    /// release their resources in that case.
    async fn close(&mut self) -> Result<(), SessionError>;
}
