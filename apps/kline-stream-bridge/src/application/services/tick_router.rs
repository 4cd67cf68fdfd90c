//! Tick Router
//!
//! Folds each tick into one bar per subscribed resolution and hands every
//! bar to the callbacks registered for exactly that (instrument,
//! resolution) pair.
//!
//! One router runs per feed connection and processes that feed's events
//! strictly in order, so its [`BarBook`] is never shared.
//!
//! A slot lives only as long as its subscription stream. When the last
//! subscriber of a pair leaves, the slot is dropped; a later subscriber
//! starts from a fresh bar rather than from state it never saw build up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::instrument::FeedClass;
use crate::domain::streaming::{Advance, BarBook, Resolution, Tick};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::feed::FeedEvent;
use crate::infrastructure::metrics;

/// What one tick produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Bars handed to callbacks.
    pub bars_delivered: usize,
    /// Resolutions for which the tick was late.
    pub late: usize,
    /// Resolutions for which the tick could not be folded.
    pub rejected: usize,
}

/// Sequential tick aggregator for one feed.
#[derive(Debug)]
pub struct TickRouter {
    feed: FeedClass,
    registry: Arc<SubscriptionRegistry>,
    book: BarBook,
    epochs: HashMap<(String, Resolution), u64>,
}

impl TickRouter {
    /// Create a router over `registry`.
    #[must_use]
    pub fn new(feed: FeedClass, registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            feed,
            registry,
            book: BarBook::new(),
            epochs: HashMap::new(),
        }
    }

    /// Aggregate and fan out one tick.
    pub fn route(&mut self, tick: &Tick) -> RouteOutcome {
        let mut outcome = RouteOutcome::default();
        let streams = self.registry.streams_for(&tick.instrument_code);
        self.sync_streams(&tick.instrument_code, &streams);

        for (resolution, _) in streams {
            let bar = match self.book.fold(tick, resolution) {
                Advance::NewBucket(bar) | Advance::SameBucket(bar) => bar,
                Advance::Late => {
                    outcome.late += 1;
                    metrics::record_tick_late(self.feed);
                    tracing::trace!(
                        feed = %self.feed,
                        code = %tick.instrument_code,
                        %resolution,
                        tick_time = tick.timestamp_ms,
                        "Late tick dropped"
                    );
                    continue;
                }
                Advance::Rejected => {
                    outcome.rejected += 1;
                    metrics::record_tick_rejected(self.feed);
                    tracing::warn!(
                        feed = %self.feed,
                        code = %tick.instrument_code,
                        %resolution,
                        tick_time = tick.timestamp_ms,
                        volume = %tick.volume,
                        "Tick out of range, dropped"
                    );
                    continue;
                }
            };

            for callback in self
                .registry
                .callbacks_for(&tick.instrument_code, resolution)
            {
                callback(&bar);
                outcome.bars_delivered += 1;
            }
        }

        if outcome.bars_delivered > 0 {
            metrics::record_bars_emitted(self.feed, outcome.bars_delivered as u64);
        }
        outcome
    }

    /// Drop slots whose stream closed since the last tick for `code`.
    fn sync_streams(&mut self, code: &str, streams: &[(Resolution, u64)]) {
        let open = |resolution: Resolution| streams.iter().any(|(r, _)| *r == resolution);
        self.book.retain_for(code, open);
        self.epochs.retain(|(c, r), _| c != code || open(*r));

        for &(resolution, epoch) in streams {
            let previous = self.epochs.insert((code.to_string(), resolution), epoch);
            if previous.is_some_and(|previous| previous != epoch) {
                self.book.forget(code, resolution);
            }
        }
    }

    /// Read-only view of the last bar per slot.
    #[must_use]
    pub const fn book(&self) -> &BarBook {
        &self.book
    }

    /// Consume feed events until the channel closes or `cancel` fires.
    pub async fn run(mut self, mut events: mpsc::Receiver<FeedEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    self.handle(event);
                }
            }
        }
        tracing::debug!(feed = %self.feed, "Tick router stopped");
    }

    fn handle(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Tick(tick) => {
                let started = Instant::now();
                self.route(&tick);
                metrics::record_processing_duration(self.feed, started.elapsed());
            }
            FeedEvent::Connected => {
                tracing::info!(
                    feed = %self.feed,
                    subscriptions = self.registry.len(),
                    "Feed connected"
                );
            }
            FeedEvent::Disconnected => {
                tracing::info!(feed = %self.feed, "Feed disconnected");
            }
            FeedEvent::Reconnecting { attempt } => {
                tracing::debug!(feed = %self.feed, attempt, "Feed reconnecting");
            }
        }
    }
}
