//! Feed Connection
//!
//! One persistent quote socket per feed class.
//!
//! # Lifecycle
//!
//! `Disconnected → Connecting → Open → Disconnected → Connecting → …`
//!
//! There is no terminal state while the task runs: every drop is followed by
//! a backoff delay and a new attempt. On entering `Open` the connection
//! replays one subscribe command per instrument held in the injected
//! [`SubscriptionRegistry`] and starts a fresh heartbeat session. Leaving
//! `Open` stops the heartbeat.
//!
//! # Outbound ordering
//!
//! Heartbeats, replays and caller commands all go through the session's
//! select loop, which owns the socket writer and stamps each command with
//! the next sequence number. Commands queued while a session was ending are
//! discarded before the next session opens.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, InboundFrame, JsonCodec};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, HeartbeatState};
use super::messages::Command;
use super::reconnect::{Backoff, BackoffConfig};
use crate::application::ports::FeedCommandPort;
use crate::domain::instrument::FeedClass;
use crate::domain::streaming::Tick;
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::config::ApiToken;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a single connection session.
///
/// None of these reach subscribers; the run loop logs them and reconnects.
#[derive(Debug, thiserror::Error)]
pub enum FeedClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Outbound command could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Nothing arrived within the liveness timeout.
    #[error("liveness timeout")]
    LivenessTimeout,

    /// `run` was called twice on the same connection.
    #[error("connection task already running")]
    AlreadyRunning,
}

// =============================================================================
// State and Events
// =============================================================================

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open; commands are accepted.
    Open,
}

impl ConnectionState {
    /// State name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
        }
    }
}

/// Events emitted by a feed connection, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Socket opened and subscriptions were replayed.
    Connected,
    /// Socket closed or failed.
    Disconnected,
    /// Waiting before the next attempt.
    Reconnecting {
        /// Attempt number since the last successful open.
        attempt: u32,
    },
    /// A decoded tick.
    Tick(Tick),
}

/// Counters exposed on the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    /// Current state.
    pub state: ConnectionState,
    /// Ticks decoded since start.
    pub ticks_received: u64,
    /// Undecodable frames since start.
    pub malformed_frames: u64,
    /// Commands dropped since start.
    pub sends_dropped: u64,
    /// Keep-alives sent since start.
    pub heartbeats_sent: u64,
    /// Attempts since the last successful open.
    pub reconnect_attempts: u32,
}

#[derive(Debug, Default)]
struct ConnectionStats {
    ticks_received: AtomicU64,
    malformed_frames: AtomicU64,
    sends_dropped: AtomicU64,
    heartbeats_sent: AtomicU64,
    reconnect_attempts: AtomicU32,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for one feed connection.
#[derive(Debug, Clone)]
pub struct FeedConnectionConfig {
    /// Feed class served by this connection.
    pub feed: FeedClass,
    /// Socket endpoint ending in `token=`.
    pub endpoint: String,
    /// Access token appended to the endpoint.
    pub token: ApiToken,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
    /// Heartbeat timing.
    pub heartbeat: HeartbeatConfig,
    /// Outbound queue capacity.
    pub outbound_capacity: usize,
}

impl FeedConnectionConfig {
    /// Create a configuration with default backoff and heartbeat.
    #[must_use]
    pub fn new(feed: FeedClass, endpoint: impl Into<String>, token: ApiToken) -> Self {
        Self {
            feed,
            endpoint: endpoint.into(),
            token,
            backoff: BackoffConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            outbound_capacity: 256,
        }
    }

    fn url(&self) -> String {
        format!("{}{}", self.endpoint, self.token.expose())
    }
}

// =============================================================================
// Connection
// =============================================================================

/// A self-healing quote socket.
///
/// Create it with [`FeedConnection::new`], spawn [`FeedConnection::run`],
/// and read [`FeedEvent`]s from the receiver passed in.
pub struct FeedConnection {
    config: FeedConnectionConfig,
    codec: JsonCodec,
    registry: Arc<SubscriptionRegistry>,
    state: RwLock<ConnectionState>,
    outbound_tx: mpsc::Sender<Command>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Command>>>,
    event_tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
    stats: ConnectionStats,
}

impl std::fmt::Debug for FeedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConnection")
            .field("feed", &self.config.feed)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl FeedConnection {
    /// Create a connection bound to `registry`.
    #[must_use]
    pub fn new(
        config: FeedConnectionConfig,
        registry: Arc<SubscriptionRegistry>,
        event_tx: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        Self {
            config,
            codec: JsonCodec::new(),
            registry,
            state: RwLock::new(ConnectionState::Disconnected),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            event_tx,
            cancel,
            stats: ConnectionStats::default(),
        }
    }

    /// Feed class served by this connection.
    #[must_use]
    pub const fn feed(&self) -> FeedClass {
        self.config.feed
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the socket is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// The registry replayed on every open.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Counter snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state(),
            ticks_received: self.stats.ticks_received.load(Ordering::Relaxed),
            malformed_frames: self.stats.malformed_frames.load(Ordering::Relaxed),
            sends_dropped: self.stats.sends_dropped.load(Ordering::Relaxed),
            heartbeats_sent: self.stats.heartbeats_sent.load(Ordering::Relaxed),
            reconnect_attempts: self.stats.reconnect_attempts.load(Ordering::Relaxed),
        }
    }

    /// Queue a command for the open session.
    ///
    /// Returns `false` when the command was dropped: the socket is not open
    /// or the outbound queue is full. Dropped commands are not retried;
    /// subscriptions are restored by the replay on the next open.
    pub fn send(&self, command: Command) -> bool {
        let name = command.name();
        if !self.is_open() {
            tracing::debug!(feed = %self.config.feed, command = name, "Dropping send, feed not open");
            self.record_dropped(name);
            return false;
        }

        match self.outbound_tx.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(feed = %self.config.feed, command = name, "Dropping send, outbound queue full");
                self.record_dropped(name);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.record_dropped(name);
                false
            }
        }
    }

    /// Run the connection loop until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `FeedClientError::AlreadyRunning` if another task already owns
    /// this connection. Session failures never escape; they trigger a
    /// reconnect.
    pub async fn run(self: Arc<Self>) -> Result<(), FeedClientError> {
        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .take()
            .ok_or(FeedClientError::AlreadyRunning)?;
        let mut backoff = Backoff::new(self.config.backoff.clone());
        let feed = self.config.feed;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(%feed, "Feed connection cancelled");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            match self.connect_and_run(&mut outbound_rx, &mut backoff).await {
                Ok(()) => {
                    tracing::info!(%feed, "Feed connection closed");
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(%feed, error = %e, "Feed connection error");
                    self.set_state(ConnectionState::Disconnected);
                    let _ = self.event_tx.send(FeedEvent::Disconnected).await;

                    let delay = backoff.next_delay();
                    let attempt = backoff.attempt();
                    self.stats.reconnect_attempts.store(attempt, Ordering::Relaxed);
                    metrics::record_reconnect(feed);
                    tracing::info!(
                        %feed,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to feed"
                    );
                    let _ = self.event_tx.send(FeedEvent::Reconnecting { attempt }).await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!(%feed, "Feed connection cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One session: connect, replay, then pump frames until failure.
    async fn connect_and_run(
        &self,
        outbound_rx: &mut mpsc::Receiver<Command>,
        backoff: &mut Backoff,
    ) -> Result<(), FeedClientError> {
        let feed = self.config.feed;
        self.set_state(ConnectionState::Connecting);
        tracing::info!(%feed, endpoint = %self.config.endpoint, "Connecting to feed");

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => {
                tracing::info!(%feed, "Feed connection cancelled during handshake");
                return Ok(());
            }
            connected = tokio_tungstenite::connect_async(self.config.url()) => connected?,
        };
        let (mut write, mut read) = ws_stream.split();

        // Commands accepted by the previous session but never written.
        let mut stale = 0_usize;
        while outbound_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            tracing::debug!(%feed, stale, "Discarded commands from previous session");
        }

        let session = Arc::new(HeartbeatState::new());
        self.set_state(ConnectionState::Open);
        backoff.reset();
        self.stats.reconnect_attempts.store(0, Ordering::Relaxed);
        tracing::info!(%feed, "Feed connection open");

        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(8);
        let heartbeat_cancel = self.cancel.child_token();
        let monitor = HeartbeatMonitor::new(
            self.config.heartbeat.clone(),
            Arc::clone(&session),
            heartbeat_tx,
            heartbeat_cancel.clone(),
        );
        let _heartbeat = tokio::spawn(monitor.run());
        let _stop_heartbeat = heartbeat_cancel.drop_guard();

        let replayed = self.registry.active_instruments();
        for code in &replayed {
            self.write_command(&mut write, &session, Command::subscribe_one(code.clone()))
                .await?;
        }
        tracing::debug!(%feed, instruments = replayed.len(), "Replayed subscriptions");
        let _ = self.event_tx.send(FeedEvent::Connected).await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                heartbeat_event = heartbeat_rx.recv() => {
                    match heartbeat_event {
                        Some(HeartbeatEvent::SendHeartbeat) => {
                            self.write_command(&mut write, &session, Command::Heartbeat).await?;
                            session.mark_sent();
                            self.stats.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                            metrics::record_heartbeat_sent(feed);
                        }
                        Some(HeartbeatEvent::Timeout) => {
                            return Err(FeedClientError::LivenessTimeout);
                        }
                        None => {
                            tracing::debug!(%feed, "Heartbeat channel closed");
                        }
                    }
                }
                command = outbound_rx.recv() => {
                    if let Some(command) = command {
                        self.write_command(&mut write, &session, command).await?;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            session.record_inbound();
                            self.handle_text(&text).await;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            session.record_inbound();
                            match std::str::from_utf8(&data) {
                                Ok(text) => self.handle_text(text).await,
                                Err(e) => self.record_malformed(&e.to_string()),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            session.record_inbound();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            session.record_inbound();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(%feed, ?frame, "Server sent close frame");
                            return Err(FeedClientError::ConnectionClosed);
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(FeedClientError::ConnectionClosed),
                    }
                }
            }
        }
    }

    /// Stamp, encode and write one command.
    async fn write_command<W>(
        &self,
        write: &mut W,
        session: &HeartbeatState,
        command: Command,
    ) -> Result<(), FeedClientError>
    where
        W: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let name = command.name();
        let seq_id = session.next_seq();
        let trace = uuid::Uuid::new_v4().to_string();
        let text = self.codec.encode_command(command, seq_id, trace)?;

        tracing::trace!(feed = %self.config.feed, command = name, seq_id, "Sending command");
        write.send(Message::Text(text.into())).await?;
        metrics::record_command_sent(self.config.feed, name);
        Ok(())
    }

    async fn handle_text(&self, text: &str) {
        match self.codec.decode(text) {
            Ok(InboundFrame::Tick(tick)) => {
                self.stats.ticks_received.fetch_add(1, Ordering::Relaxed);
                metrics::record_tick_received(self.config.feed);
                let _ = self.event_tx.send(FeedEvent::Tick(tick)).await;
            }
            Ok(InboundFrame::Control { cmd_id }) => {
                tracing::trace!(feed = %self.config.feed, ?cmd_id, "Control frame");
            }
            Ok(InboundFrame::Empty) => {}
            Err(e) => self.record_malformed(&e.to_string()),
        }
    }

    fn record_malformed(&self, error: &str) {
        tracing::warn!(feed = %self.config.feed, error, "Discarding malformed frame");
        self.stats.malformed_frames.fetch_add(1, Ordering::Relaxed);
        metrics::record_malformed_frame(self.config.feed);
    }

    fn record_dropped(&self, command: &'static str) {
        self.stats.sends_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::record_send_dropped(self.config.feed, command);
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = std::mem::replace(&mut *self.state.write(), next);
        if prev != next {
            tracing::debug!(feed = %self.config.feed, from = prev.as_str(), to = next.as_str(), "Connection state");
            metrics::set_connection_open(self.config.feed, next == ConnectionState::Open);
        }
    }
}

impl FeedCommandPort for FeedConnection {
    fn feed(&self) -> FeedClass {
        self.config.feed
    }

    fn is_open(&self) -> bool {
        Self::is_open(self)
    }

    fn subscribe(&self, instrument_code: &str) -> bool {
        self.send(Command::subscribe_one(instrument_code))
    }

    fn cancel(&self) -> bool {
        self.send(Command::Unsubscribe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(endpoint: &str) -> (Arc<FeedConnection>, mpsc::Receiver<FeedEvent>) {
        let (event_tx, event_rx) = mpsc::channel(16);
        let config = FeedConnectionConfig::new(
            FeedClass::Generic,
            endpoint,
            ApiToken::new("t").unwrap(),
        );
        let conn = FeedConnection::new(
            config,
            Arc::new(SubscriptionRegistry::new()),
            event_tx,
            CancellationToken::new(),
        );
        (Arc::new(conn), event_rx)
    }

    #[test]
    fn starts_disconnected() {
        let (conn, _rx) = connection("ws://127.0.0.1:1/?token=");
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_open());
        assert_eq!(conn.snapshot().ticks_received, 0);
    }

    #[test]
    fn send_is_dropped_when_not_open() {
        let (conn, _rx) = connection("ws://127.0.0.1:1/?token=");
        assert!(!conn.send(Command::Heartbeat));
        assert!(!conn.send(Command::subscribe_one("EURUSD")));
        assert_eq!(conn.snapshot().sends_dropped, 2);
    }

    #[test]
    fn url_appends_token() {
        let config = FeedConnectionConfig::new(
            FeedClass::Equity,
            "wss://example.test/ws?token=",
            ApiToken::new("abc").unwrap(),
        );
        assert_eq!(config.url(), "wss://example.test/ws?token=abc");
        assert!(!format!("{config:?}").contains("abc"));
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let (conn, _rx) = connection("ws://127.0.0.1:1/?token=");
        conn.cancel.cancel();
        assert!(Arc::clone(&conn).run().await.is_ok());
        assert!(matches!(
            conn.run().await,
            Err(FeedClientError::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_reconnecting() {
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let mut config = FeedConnectionConfig::new(
            FeedClass::Generic,
            "ws://127.0.0.1:1/?token=",
            ApiToken::new("t").unwrap(),
        );
        config.backoff.initial_delay = std::time::Duration::from_millis(10);
        let cancel = CancellationToken::new();
        let conn = Arc::new(FeedConnection::new(
            config,
            Arc::new(SubscriptionRegistry::new()),
            event_tx,
            cancel.clone(),
        ));
        let handle = tokio::spawn(Arc::clone(&conn).run());

        assert_eq!(event_rx.recv().await, Some(FeedEvent::Disconnected));
        assert_eq!(
            event_rx.recv().await,
            Some(FeedEvent::Reconnecting { attempt: 1 })
        );

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
