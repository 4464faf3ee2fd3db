//! Relay channel lifecycle.
//!
//! The default policy is fail-fast: a channel that cannot be established, or
//! that drops mid-session, ends the session and the user re-joins explicitly.
//! [`ConnectionPolicy`] carries an explicit retry count and a bounded
//! exponential backoff for callers that want more attempts.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::transport::Transport;

/// Default timeout for one connection attempt.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default delay before the first retry, when retries are enabled.
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound on the delay between two attempts.
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// State of the channel to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The channel failed. Terminal for the session.
    Errored,
}

/// How hard to try when establishing the channel.
///
/// # Example
///
/// ```
/// use coderoom_client::connection::ConnectionPolicy;
/// use std::time::Duration;
///
/// let policy = ConnectionPolicy::fail_fast();
/// assert_eq!(policy.max_retries, 0);
///
/// let patient = ConnectionPolicy::fail_fast()
///     .with_max_retries(3)
///     .with_retry_backoff(Duration::from_millis(200));
/// assert_eq!(patient.backoff_for(2), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPolicy {
    /// Attempts made after the first one fails. `0` means fail fast.
    pub max_retries: u32,
    /// Timeout for each individual attempt.
    pub connect_timeout: Duration,
    /// Delay before the first retry; doubled for each retry after that and
    /// capped at 30 seconds.
    pub retry_backoff: Duration,
}

impl ConnectionPolicy {
    /// One attempt, no retries.
    pub fn fail_fast() -> Self {
        Self {
            max_retries: 0,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Delay to wait before attempt number `attempt` (0-based). The first
    /// attempt never waits.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempt - 1).min(16);
        self.retry_backoff
            .saturating_mul(factor)
            .min(MAX_RETRY_BACKOFF)
    }

    /// Total number of attempts this policy allows.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self::fail_fast()
    }
}

/// Drive `attempt` according to `policy`.
///
/// `attempt` receives the 0-based attempt number. Each attempt is bounded by
/// [`ConnectionPolicy::connect_timeout`].
///
/// # Errors
///
/// Returns [`SessionError::Connection`] with the last failure once every
/// allowed attempt has failed.
pub async fn connect_with_policy<T, F, Fut>(policy: &ConnectionPolicy, mut attempt: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts();
    let mut reason = String::from("no attempt made");

    for n in 0..attempts {
        let delay = policy.backoff_for(n);
        if !delay.is_zero() {
            debug!(attempt = n + 1, ?delay, "waiting before reconnect attempt");
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout(policy.connect_timeout, attempt(n)).await {
            Ok(Ok(channel)) => {
                debug!(attempt = n + 1, "relay channel established");
                return Ok(channel);
            }
            Ok(Err(e)) => {
                warn!(attempt = n + 1, "connection attempt failed: {e}");
                reason = e.to_string();
            }
            Err(_) => {
                warn!(attempt = n + 1, "connection attempt timed out");
                reason = SessionError::Timeout.to_string();
            }
        }
    }

    Err(SessionError::Connection { attempts, reason })
}

/// Owns the channel lifecycle of one session and publishes its
/// [`ConnectionState`].
///
/// The transport itself is owned by the session loop; the manager is told
/// about every transition and performs the close.
#[derive(Debug)]
pub struct ConnectionManager {
    policy: ConnectionPolicy,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(policy: ConnectionPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { policy, state }
    }

    /// Current channel state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Establish a channel with `attempt`, following the policy.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connection`] and moves to
    /// [`ConnectionState::Errored`] if no attempt succeeds.
    pub async fn establish<T, F, Fut>(&self, attempt: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.transition(ConnectionState::Connecting);
        match connect_with_policy(&self.policy, attempt).await {
            Ok(channel) => {
                self.transition(ConnectionState::Connected);
                Ok(channel)
            }
            Err(e) => {
                self.transition(ConnectionState::Errored);
                Err(e)
            }
        }
    }

    /// Open a WebSocket channel to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connection`] if no attempt succeeds.
    #[cfg(feature = "transport-websocket")]
    pub async fn connect(&self, endpoint: &str) -> Result<crate::transports::WebSocketTransport> {
        self.establish(|_| crate::transports::WebSocketTransport::connect(endpoint))
            .await
    }

    /// Record that a channel established elsewhere is live.
    pub fn mark_connected(&self) {
        self.transition(ConnectionState::Connected);
    }

    /// Record an unrecoverable channel failure.
    pub fn mark_failed(&self) {
        self.transition(ConnectionState::Errored);
    }

    /// Close `transport`. Safe to call on an already-closed channel.
    ///
    /// An `Errored` state is kept so the failure stays visible.
    pub async fn disconnect(&self, transport: &mut impl Transport) {
        if let Err(e) = transport.close().await {
            debug!("error while closing relay channel: {e}");
        }
        if self.state() != ConnectionState::Errored {
            self.transition(ConnectionState::Disconnected);
        }
    }

    fn transition(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(?prev, ?next, "connection state changed");
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
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn default_policy_fails_fast() {
        let policy = ConnectionPolicy::default();
        assert_eq!(policy.max_retries, 0);
        assert_eq!(policy.attempts(), 1);
        assert_eq!(policy.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let policy = ConnectionPolicy::fail_fast().with_retry_backoff(Duration::from_secs(1));
        assert_eq!(policy.backoff_for(0), Duration::ZERO);
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(10), Duration::from_secs(30));
        assert_eq!(policy.backoff_for(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn fail_fast_makes_exactly_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<()> = connect_with_policy(&ConnectionPolicy::fail_fast(), |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SessionError::TransportClosed)
            }
        })
        .await;

        match result {
            Err(SessionError::Connection { attempts, reason }) => {
                assert_eq!(attempts, 1);
                assert!(reason.contains("closed"));
            }
            other => panic!("expected Connection error, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let policy = ConnectionPolicy::fail_fast()
            .with_max_retries(3)
            .with_retry_backoff(Duration::from_millis(1));
        let result = connect_with_policy(&policy, |n| async move {
            if n < 2 {
                Err(SessionError::TransportClosed)
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn slow_attempt_times_out() {
        let policy = ConnectionPolicy::fail_fast().with_connect_timeout(Duration::from_millis(20));
        let result: Result<()> =
            connect_with_policy(&policy, |_| std::future::pending::<Result<()>>()).await;
        match result {
            Err(SessionError::Connection { reason, .. }) => assert_eq!(reason, "operation timed out"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn manager_tracks_successful_establish() {
        let manager = ConnectionManager::new(ConnectionPolicy::fail_fast());
        let mut updates = manager.subscribe();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        let value = manager.establish(|_| async { Ok(7u8) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(updates.has_changed().unwrap());
        assert_eq!(*updates.borrow_and_update(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn manager_reports_errored_after_failed_establish() {
        let manager = ConnectionManager::new(ConnectionPolicy::fail_fast());
        let result: Result<()> = manager
            .establish(|_| async { Err(SessionError::TransportClosed) })
            .await;
        assert!(result.is_err());
        assert_eq!(manager.state(), ConnectionState::Errored);
    }

    #[tokio::test]
    async fn manager_retries_with_its_own_policy() {
        let manager = ConnectionManager::new(
            ConnectionPolicy::fail_fast()
                .with_max_retries(2)
                .with_retry_backoff(Duration::from_millis(1)),
        );
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<()> = manager
            .establish(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(SessionError::TransportClosed) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(manager.state(), ConnectionState::Errored);
    }

    struct CountingTransport {
        closes: u32,
    }

    #[async_trait::async_trait]
    impl Transport for CountingTransport {
        async fn send(&mut self, _message: String) -> Result<()> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            None
        }

        async fn close(&mut self) -> Result<()> {
            self.closes += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn disconnect_is_repeatable_and_keeps_errored() {
        let manager = ConnectionManager::new(ConnectionPolicy::fail_fast());
        let mut transport = CountingTransport { closes: 0 };

        manager.mark_connected();
        manager.disconnect(&mut transport).await;
        manager.disconnect(&mut transport).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.closes, 2);

        manager.mark_failed();
        manager.disconnect(&mut transport).await;
        assert_eq!(manager.state(), ConnectionState::Errored);
    }

    #[cfg(feature = "transport-websocket")]
    #[tokio::test]
    async fn unreachable_endpoint_is_a_connection_error() {
        let manager = ConnectionManager::new(ConnectionPolicy::fail_fast());
        let result = manager.connect("ws://127.0.0.1:1").await;
        assert!(matches!(result, Err(SessionError::Connection { attempts: 1, .. })));
        assert_eq!(manager.state(), ConnectionState::Errored);
    }
}
