//! Chart Feed
//!
//! Consumer-facing entry point: symbol resolution and search, bar
//! subscriptions routed to the right feed, and history queries.
//!
//! # Routing
//!
//! Each instrument class maps to one [`FeedChannel`] (equity or generic).
//! A channel pairs the registry that its tick router reads with the command
//! port of its connection.

use std::sync::Arc;

use parking_lot::RwLock;

use super::backfill::{BackfillService, HistoryResult};
use crate::application::ports::{FeedCommandPort, HistoryPort, HistoryRequest};
use crate::domain::instrument::{
    CatalogError, FeedClass, Instrument, InstrumentCatalog, InstrumentClass, SymbolProfile,
};
use crate::domain::streaming::Resolution;
use crate::domain::subscription::{
    BarCallback, SubscriptionId, SubscriptionRegistry, SubscriptionStats, UnsubscribePolicy,
};
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Errors returned to consumers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// Catalog lookup failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The instrument's class does not offer the resolution.
    #[error("resolution {resolution} is not offered for {class} instruments")]
    UnsupportedResolution {
        /// Requested resolution.
        resolution: Resolution,
        /// Instrument class.
        class: InstrumentClass,
    },
}

// =============================================================================
// Channels
// =============================================================================

/// Registry and command port for one feed class.
#[derive(Clone)]
pub struct FeedChannel {
    registry: Arc<SubscriptionRegistry>,
    port: Arc<dyn FeedCommandPort>,
}

impl FeedChannel {
    /// Pair a registry with the port of the connection that replays it.
    #[must_use]
    pub fn new(registry: Arc<SubscriptionRegistry>, port: Arc<dyn FeedCommandPort>) -> Self {
        Self { registry, port }
    }

    /// Subscription registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Command port.
    #[must_use]
    pub fn port(&self) -> &dyn FeedCommandPort {
        self.port.as_ref()
    }
}

impl std::fmt::Debug for FeedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedChannel")
            .field("feed", &self.port.feed())
            .field("registry", &self.registry)
            .finish()
    }
}

// =============================================================================
// Chart Feed
// =============================================================================

/// Consumer façade over both feeds.
#[derive(Debug)]
pub struct ChartFeed {
    catalog: RwLock<InstrumentCatalog>,
    equity: FeedChannel,
    generic: FeedChannel,
    backfill: BackfillService,
    policy: UnsubscribePolicy,
}

impl ChartFeed {
    /// Create a façade.
    #[must_use]
    pub fn new(
        catalog: InstrumentCatalog,
        equity: FeedChannel,
        generic: FeedChannel,
        history: Arc<dyn HistoryPort>,
        policy: UnsubscribePolicy,
    ) -> Self {
        Self {
            catalog: RwLock::new(catalog),
            equity,
            generic,
            backfill: BackfillService::new(history),
            policy,
        }
    }

    /// Channel for a feed class.
    #[must_use]
    pub const fn channel(&self, feed: FeedClass) -> &FeedChannel {
        match feed {
            FeedClass::Equity => &self.equity,
            FeedClass::Generic => &self.generic,
        }
    }

    /// Add or replace a catalog instrument.
    pub fn add_instrument(&self, instrument: Instrument) {
        self.catalog.write().insert(instrument);
    }

    /// Resolve a symbol or ticker into its chart profile.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::Catalog` for unknown instruments.
    pub fn resolve_symbol(&self, code: &str) -> Result<SymbolProfile, FeedError> {
        Ok(self.catalog.read().resolve(code)?)
    }

    /// Case-insensitive catalog search; an empty query lists everything.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<Instrument> {
        self.catalog
            .read()
            .search(query)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Subscribe `callback` to live bars.
    ///
    /// The subscribe command is fire-and-forget: if the feed is not open it
    /// is dropped and the next open replays it.
    ///
    /// # Errors
    ///
    /// Returns `FeedError` for unknown instruments or unsupported resolutions.
    pub fn subscribe(
        &self,
        code: &str,
        resolution: Resolution,
        callback: BarCallback,
    ) -> Result<SubscriptionId, FeedError> {
        let instrument = self.checked_instrument(code, resolution)?;
        let feed = instrument.class.feed_class();
        let channel = self.channel(feed);

        let id = channel
            .registry
            .insert(&instrument.ticker, resolution, callback);
        let sent = channel.port.subscribe(&instrument.ticker);
        metrics::set_subscriptions(feed, channel.registry.len());

        tracing::info!(
            %feed,
            code = %instrument.ticker,
            %resolution,
            subscription = %id,
            sent,
            "Subscribed"
        );
        Ok(id)
    }

    /// Remove a subscription.
    ///
    /// Returns `false` if the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        for channel in [&self.equity, &self.generic] {
            let Some(removal) = channel.registry.remove(id) else {
                continue;
            };
            let feed = channel.port.feed();
            let cancel = removal.needs_cancel(self.policy);
            if cancel {
                channel.port.cancel();
            }
            metrics::set_subscriptions(feed, channel.registry.len());

            tracing::info!(
                %feed,
                code = %removal.subscription.instrument_code,
                resolution = %removal.subscription.resolution,
                subscription = %id,
                remaining = removal.remaining_for_instrument,
                cancel,
                "Unsubscribed"
            );
            return true;
        }
        false
    }

    /// Fetch history for a chart.
    ///
    /// `end_timestamp_secs` is 0 for the first, most recent page.
    ///
    /// # Errors
    ///
    /// Returns `FeedError` for unknown instruments or unsupported
    /// resolutions. Upstream failures are reported as `HistoryResult::NoData`.
    pub async fn fetch_history(
        &self,
        code: &str,
        resolution: Resolution,
        end_timestamp_secs: i64,
        max_count: u32,
    ) -> Result<HistoryResult, FeedError> {
        let instrument = self.checked_instrument(code, resolution)?;
        let request = HistoryRequest::latest(&instrument.ticker, instrument.class, resolution)
            .ending_at(end_timestamp_secs)
            .with_max_count(max_count);
        Ok(self.backfill.fetch(&request).await)
    }

    /// Subscription counts for a feed.
    #[must_use]
    pub fn stats(&self, feed: FeedClass) -> SubscriptionStats {
        self.channel(feed).registry.stats()
    }

    fn checked_instrument(&self, code: &str, resolution: Resolution) -> Result<Instrument, FeedError> {
        let instrument = self.catalog.read().lookup(code)?.clone();
        if !instrument.class.supports(resolution) {
            return Err(FeedError::UnsupportedResolution {
                resolution,
                class: instrument.class,
            });
        }
        Ok(instrument)
    }
}
