//! Subscription Registry
//!
//! Tracks which consumer wants bars for which (instrument, resolution) pair
//! and the callback that receives them.
//!
//! # Design
//!
//! - One entry per `subscribe` call, keyed by an opaque [`SubscriptionId`]
//! - Several entries may share an instrument (different resolutions or
//!   different consumers); the feed only needs the instrument once
//! - The registry holds no wire state: callers turn its answers into
//!   subscribe/unsubscribe commands, which keeps it usable after a reconnect
//!   where the remote side has forgotten everything

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::streaming::{Bar, Resolution};

// =============================================================================
// Types
// =============================================================================

/// Source of subscription ids, shared by every registry in the process so
/// ids stay unique across feeds.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque subscription token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Consumer callback receiving every emitted bar.
pub type BarCallback = Arc<dyn Fn(&Bar) + Send + Sync>;

/// A registered subscription.
#[derive(Clone)]
pub struct Subscription {
    /// Subscription token.
    pub id: SubscriptionId,
    /// Feed instrument code.
    pub instrument_code: String,
    /// Requested bar width.
    pub resolution: Resolution,
    /// Bar receiver.
    pub callback: BarCallback,
    /// Id of the subscription that opened this (instrument, resolution)
    /// stream. Stays the same while at least one subscriber remains, so a
    /// changed epoch means the stream was closed and reopened.
    pub epoch: u64,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("instrument_code", &self.instrument_code)
            .field("resolution", &self.resolution)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

/// When an unsubscribe should cancel the instrument on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnsubscribePolicy {
    /// Every unsubscribe sends a cancel command.
    #[default]
    Always,
    /// Only the last subscription for an instrument sends a cancel command.
    LastReference,
}

impl UnsubscribePolicy {
    /// Parse a policy name; anything unrecognised falls back to `Always`.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "last_reference" | "refcount" => Self::LastReference,
            _ => Self::Always,
        }
    }

    /// Policy name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::LastReference => "last_reference",
        }
    }
}

/// Result of removing a subscription.
#[derive(Debug, Clone)]
pub struct Removal {
    /// The removed subscription.
    pub subscription: Subscription,
    /// Subscriptions still registered for the same instrument.
    pub remaining_for_instrument: usize,
}

impl Removal {
    /// Whether a cancel command should go out under `policy`.
    #[must_use]
    pub const fn needs_cancel(&self, policy: UnsubscribePolicy) -> bool {
        match policy {
            UnsubscribePolicy::Always => true,
            UnsubscribePolicy::LastReference => self.remaining_for_instrument == 0,
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Thread-safe registry of bar subscriptions for one feed.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use kline_stream_bridge::domain::streaming::Resolution;
/// use kline_stream_bridge::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
/// let a = registry.insert("BTCUSDT", Resolution::Minute1, Arc::new(|_bar| {}));
/// let _b = registry.insert("BTCUSDT", Resolution::Minute5, Arc::new(|_bar| {}));
///
/// // Two subscriptions, one instrument on the wire
/// assert_eq!(registry.active_instruments(), vec!["BTCUSDT".to_string()]);
///
/// let removal = registry.remove(a).unwrap();
/// assert_eq!(removal.remaining_for_instrument, 1);
/// ```
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<SubscriptionId, Subscription>>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a callback for bars of `instrument_code` at `resolution`.
    pub fn insert(
        &self,
        instrument_code: &str,
        resolution: Resolution,
        callback: BarCallback,
    ) -> SubscriptionId {
        let id = SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.write();
        let epoch = entries
            .values()
            .find(|s| s.instrument_code == instrument_code && s.resolution == resolution)
            .map_or(id.0, |s| s.epoch);
        let subscription = Subscription {
            id,
            instrument_code: instrument_code.to_string(),
            resolution,
            callback,
            epoch,
        };
        entries.insert(id, subscription);
        id
    }

    /// Remove a subscription.
    ///
    /// Returns `None` if the id is unknown (already removed).
    pub fn remove(&self, id: SubscriptionId) -> Option<Removal> {
        let mut entries = self.entries.write();
        let subscription = entries.remove(&id)?;
        let remaining_for_instrument = entries
            .values()
            .filter(|s| s.instrument_code == subscription.instrument_code)
            .count();

        Some(Removal {
            subscription,
            remaining_for_instrument,
        })
    }

    /// Look up a subscription.
    #[must_use]
    pub fn get(&self, id: SubscriptionId) -> Option<Subscription> {
        self.entries.read().get(&id).cloned()
    }

    /// Distinct instruments with at least one subscription, sorted.
    #[must_use]
    pub fn active_instruments(&self) -> Vec<String> {
        self.entries
            .read()
            .values()
            .map(|s| s.instrument_code.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct resolutions subscribed for an instrument, shortest first.
    #[must_use]
    pub fn resolutions_for(&self, instrument_code: &str) -> Vec<Resolution> {
        self.entries
            .read()
            .values()
            .filter(|s| s.instrument_code == instrument_code)
            .map(|s| s.resolution)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Open streams for an instrument as `(resolution, epoch)`, shortest
    /// resolution first.
    #[must_use]
    pub fn streams_for(&self, instrument_code: &str) -> Vec<(Resolution, u64)> {
        self.entries
            .read()
            .values()
            .filter(|s| s.instrument_code == instrument_code)
            .map(|s| (s.resolution, s.epoch))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Callbacks registered for exactly (instrument, resolution).
    ///
    /// The callbacks are cloned out so they can run without holding the lock.
    #[must_use]
    pub fn callbacks_for(&self, instrument_code: &str, resolution: Resolution) -> Vec<BarCallback> {
        self.entries
            .read()
            .values()
            .filter(|s| s.instrument_code == instrument_code && s.resolution == resolution)
            .map(|s| Arc::clone(&s.callback))
            .collect()
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether there are no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let entries = self.entries.read();
        let instrument_count = entries
            .values()
            .map(|s| s.instrument_code.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        SubscriptionStats {
            subscription_count: entries.len(),
            instrument_count,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SubscriptionStats {
    /// Number of subscriptions.
    pub subscription_count: usize,
    /// Number of distinct instruments.
    pub instrument_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn noop() -> BarCallback {
        Arc::new(|_| {})
    }

    #[test]
    fn ids_are_unique() {
        let registry = SubscriptionRegistry::new();
        let a = registry.insert("AAPL.US", Resolution::Minute1, noop());
        let b = registry.insert("AAPL.US", Resolution::Minute1, noop());
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn active_instruments_are_distinct() {
        let registry = SubscriptionRegistry::new();
        registry.insert("EURUSD", Resolution::Minute1, noop());
        registry.insert("EURUSD", Resolution::Minute5, noop());
        registry.insert("BTCUSDT", Resolution::Day1, noop());
        registry.insert("EURUSD", Resolution::Minute1, noop());

        assert_eq!(
            registry.active_instruments(),
            vec!["BTCUSDT".to_string(), "EURUSD".to_string()]
        );
        assert_eq!(
            registry.stats(),
            SubscriptionStats {
                subscription_count: 4,
                instrument_count: 2
            }
        );
    }

    #[test]
    fn resolutions_for_instrument() {
        let registry = SubscriptionRegistry::new();
        registry.insert("EURUSD", Resolution::Minute5, noop());
        registry.insert("EURUSD", Resolution::Minute1, noop());
        registry.insert("EURUSD", Resolution::Minute5, noop());
        registry.insert("GBPUSD", Resolution::Hour1, noop());

        assert_eq!(
            registry.resolutions_for("EURUSD"),
            vec![Resolution::Minute1, Resolution::Minute5]
        );
        assert!(registry.resolutions_for("XAUUSD").is_empty());
    }

    #[test]
    fn callbacks_match_exact_pair() {
        let registry = SubscriptionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        registry.insert(
            "EURUSD",
            Resolution::Minute1,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        registry.insert("EURUSD", Resolution::Minute5, noop());

        let callbacks = registry.callbacks_for("EURUSD", Resolution::Minute1);
        assert_eq!(callbacks.len(), 1);
        callbacks[0](&crate::domain::streaming::Bar::opening(
            0,
            rust_decimal::Decimal::ONE,
            rust_decimal::Decimal::ONE,
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.callbacks_for("EURUSD", Resolution::Hour1).is_empty());
    }

    #[test]
    fn removal_reports_remaining() {
        let registry = SubscriptionRegistry::new();
        let a = registry.insert("EURUSD", Resolution::Minute1, noop());
        let b = registry.insert("EURUSD", Resolution::Minute5, noop());

        let first = registry.remove(a).unwrap();
        assert_eq!(first.remaining_for_instrument, 1);
        assert!(first.needs_cancel(UnsubscribePolicy::Always));
        assert!(!first.needs_cancel(UnsubscribePolicy::LastReference));

        let last = registry.remove(b).unwrap();
        assert_eq!(last.remaining_for_instrument, 0);
        assert!(last.needs_cancel(UnsubscribePolicy::LastReference));
        assert!(registry.is_empty());
    }

    #[test]
    fn stream_epoch_survives_while_any_subscriber_remains() {
        let registry = SubscriptionRegistry::new();
        let first = registry.insert("EURUSD", Resolution::Minute1, noop());
        let second = registry.insert("EURUSD", Resolution::Minute1, noop());
        let epoch = registry.get(first).unwrap().epoch;
        assert_eq!(registry.get(second).unwrap().epoch, epoch);

        registry.remove(first);
        let third = registry.insert("EURUSD", Resolution::Minute1, noop());
        assert_eq!(registry.streams_for("EURUSD"), vec![(Resolution::Minute1, epoch)]);

        registry.remove(second);
        registry.remove(third);
        assert!(registry.streams_for("EURUSD").is_empty());

        let reopened = registry.insert("EURUSD", Resolution::Minute1, noop());
        assert_eq!(
            registry.streams_for("EURUSD"),
            vec![(Resolution::Minute1, reopened.get())]
        );
        assert_ne!(reopened.get(), epoch);
    }

    #[test]
    fn ids_unique_across_registries() {
        let a = SubscriptionRegistry::new();
        let b = SubscriptionRegistry::new();
        let id_a = a.insert("AAPL.US", Resolution::Minute1, noop());
        let id_b = b.insert("EURUSD", Resolution::Minute1, noop());
        assert_ne!(id_a, id_b);
        assert!(b.remove(id_a).is_none());
        assert!(a.remove(id_a).is_some());
    }

    #[test]
    fn remove_unknown_is_none() {
        let registry = SubscriptionRegistry::new();
        let id = registry.insert("EURUSD", Resolution::Minute1, noop());
        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn policy_parsing() {
        assert_eq!(
            UnsubscribePolicy::from_str_case_insensitive("LAST_REFERENCE"),
            UnsubscribePolicy::LastReference
        );
        assert_eq!(
            UnsubscribePolicy::from_str_case_insensitive("whatever"),
            UnsubscribePolicy::Always
        );
        assert_eq!(UnsubscribePolicy::default().as_str(), "always");
    }

    #[test]
    fn thread_safety_concurrent_inserts() {
        use std::thread;

        let registry = Arc::new(SubscriptionRegistry::new());
        let mut handles = vec![];

        for i in 0..10 {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                r.insert(&format!("SYM{i}"), Resolution::Minute1, Arc::new(|_| {}));
                r.insert("SHARED", Resolution::Minute1, Arc::new(|_| {}))
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = registry.stats();
        assert_eq!(stats.subscription_count, 20);
        assert_eq!(stats.instrument_count, 11);
    }
}
