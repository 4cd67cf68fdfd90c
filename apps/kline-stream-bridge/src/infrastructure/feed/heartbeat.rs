//! Heartbeat Monitor
//!
//! Drives keep-alive commands for an open feed connection: one immediately
//! on open, then one per interval. With a liveness timeout configured, a
//! connection that has received nothing for that long is reported dead.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Heartbeat timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between keep-alive commands.
    pub interval: Duration,
    /// Reconnect when nothing arrives for this long. `None` relies on the
    /// transport's own close and error events.
    pub liveness_timeout: Option<Duration>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            liveness_timeout: None,
        }
    }
}

/// Events emitted by the heartbeat monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Time to send a keep-alive command.
    SendHeartbeat,
    /// No inbound traffic within the liveness timeout.
    Timeout,
}

/// Per-session outbound sequencing and liveness timestamps.
///
/// A fresh state is created for every connection, so sequence numbers
/// restart at 1 after a reconnect.
#[derive(Debug)]
pub struct HeartbeatState {
    next_seq: AtomicU64,
    last_sent_at: RwLock<Option<Instant>>,
    last_inbound_at: RwLock<Instant>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create state for a new session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(1),
            last_sent_at: RwLock::new(None),
            last_inbound_at: RwLock::new(Instant::now()),
        }
    }

    /// Claim the next outbound sequence number.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Number of sequence numbers issued so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst) - 1
    }

    /// Record that a keep-alive went out.
    pub fn mark_sent(&self) {
        *self.last_sent_at.write() = Some(Instant::now());
    }

    /// When the last keep-alive went out.
    #[must_use]
    pub fn last_sent_at(&self) -> Option<Instant> {
        *self.last_sent_at.read()
    }

    /// Record any inbound frame.
    pub fn record_inbound(&self) {
        *self.last_inbound_at.write() = Instant::now();
    }

    /// Time since the last inbound frame (or since the session began).
    #[must_use]
    pub fn time_since_inbound(&self) -> Duration {
        self.last_inbound_at.read().elapsed()
    }
}

/// Timer task that asks its connection to send keep-alives.
///
/// # Example
///
/// ```rust,no_run
/// use kline_stream_bridge::infrastructure::feed::heartbeat::{
///     HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, HeartbeatState,
/// };
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() {
///     let state = Arc::new(HeartbeatState::new());
///     let (event_tx, mut event_rx) = mpsc::channel(8);
///     let cancel = CancellationToken::new();
///
///     let monitor = HeartbeatMonitor::new(
///         HeartbeatConfig::default(),
///         Arc::clone(&state),
///         event_tx,
///         cancel.clone(),
///     );
///     tokio::spawn(monitor.run());
///
///     while let Some(event) = event_rx.recv().await {
///         match event {
///             HeartbeatEvent::SendHeartbeat => state.mark_sent(),
///             HeartbeatEvent::Timeout => break,
///         }
///     }
///     cancel.cancel();
/// }
/// ```
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Create a monitor for one session.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the event channel closes or liveness fails.
    ///
    /// The first keep-alive is requested immediately.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.tick().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<(), ()> {
        if let Some(timeout) = self.config.liveness_timeout {
            let silent_for = self.state.time_since_inbound();
            if silent_for > timeout {
                tracing::warn!(
                    silent_ms = silent_for.as_millis(),
                    timeout_ms = timeout.as_millis(),
                    "Feed liveness timeout"
                );
                let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
                return Err(());
            }
        }

        if self.event_tx.send(HeartbeatEvent::SendHeartbeat).await.is_err() {
            tracing::debug!("Heartbeat channel closed");
            return Err(());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_starts_at_one() {
        let state = HeartbeatState::new();
        assert_eq!(state.issued(), 0);
        assert_eq!(state.next_seq(), 1);
        assert_eq!(state.next_seq(), 2);
        assert_eq!(state.issued(), 2);
    }

    #[test]
    fn records_sends_and_inbound() {
        let state = HeartbeatState::new();
        assert!(state.last_sent_at().is_none());
        state.mark_sent();
        assert!(state.last_sent_at().is_some());

        state.record_inbound();
        assert!(state.time_since_inbound() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn first_heartbeat_is_immediate() {
        let config = HeartbeatConfig {
            interval: Duration::from_secs(3600),
            liveness_timeout: None,
        };
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let monitor =
            HeartbeatMonitor::new(config, Arc::new(HeartbeatState::new()), event_tx, cancel.clone());
        let handle = tokio::spawn(monitor.run());

        let event = tokio::time::timeout(Duration::from_millis(200), event_rx.recv())
            .await
            .expect("should receive event")
            .expect("channel open");
        assert_eq!(event, HeartbeatEvent::SendHeartbeat);

        cancel.cancel();
        handle.await.expect("task should complete");
    }

    #[tokio::test]
    async fn repeats_on_interval() {
        let config = HeartbeatConfig {
            interval: Duration::from_millis(30),
            liveness_timeout: None,
        };
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let monitor =
            HeartbeatMonitor::new(config, Arc::new(HeartbeatState::new()), event_tx, cancel.clone());
        let handle = tokio::spawn(monitor.run());

        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
                .await
                .expect("should receive event");
            assert_eq!(event, Some(HeartbeatEvent::SendHeartbeat));
        }

        cancel.cancel();
        handle.await.expect("task should complete");
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let config = HeartbeatConfig {
            interval: Duration::from_millis(20),
            liveness_timeout: Some(Duration::from_millis(60)),
        };
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let monitor =
            HeartbeatMonitor::new(config, Arc::new(HeartbeatState::new()), event_tx, cancel.clone());
        let handle = tokio::spawn(monitor.run());

        let mut timed_out = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(500), event_rx.recv()).await
        {
            if event == HeartbeatEvent::Timeout {
                timed_out = true;
                break;
            }
        }
        assert!(timed_out, "should report timeout");

        let _ = tokio::time::timeout(Duration::from_millis(100), handle).await;
    }

    #[tokio::test]
    async fn cancellation_stops_monitor() {
        let (event_tx, _event_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let monitor = HeartbeatMonitor::new(
            HeartbeatConfig::default(),
            Arc::new(HeartbeatState::new()),
            event_tx,
            cancel.clone(),
        );
        let handle = tokio::spawn(monitor.run());
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "monitor should stop on cancellation");
    }
}
