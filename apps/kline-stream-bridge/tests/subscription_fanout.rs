//! Subscription Fan-out Integration Tests
//!
//! Subscribes through `ChartFeed` and routes ticks through each feed's
//! `TickRouter`, checking who receives which bars and what goes on the wire.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use kline_stream_bridge::domain::instrument::FeedClass;
use kline_stream_bridge::{
    BackfillError, Bar, BarCallback, ChartFeed, FeedChannel, FeedCommandPort, HistoryPort,
    HistoryRequest, Instrument, InstrumentCatalog, InstrumentClass, Resolution,
    SubscriptionRegistry, Tick, TickRouter, UnsubscribePolicy,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Wire {
    Subscribe(String),
    Cancel,
}

/// Records wire commands instead of sending them.
struct WirePort {
    feed: FeedClass,
    sent: Mutex<Vec<Wire>>,
}

impl WirePort {
    fn new(feed: FeedClass) -> Arc<Self> {
        Arc::new(Self {
            feed,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<Wire> {
        self.sent.lock().clone()
    }
}

impl FeedCommandPort for WirePort {
    fn feed(&self) -> FeedClass {
        self.feed
    }

    fn is_open(&self) -> bool {
        true
    }

    fn subscribe(&self, instrument_code: &str) -> bool {
        self.sent
            .lock()
            .push(Wire::Subscribe(instrument_code.to_string()));
        true
    }

    fn cancel(&self) -> bool {
        self.sent.lock().push(Wire::Cancel);
        true
    }
}

struct NoHistory;

#[async_trait]
impl HistoryPort for NoHistory {
    async fn fetch_history(&self, _: &HistoryRequest) -> Result<Vec<Bar>, BackfillError> {
        Ok(Vec::new())
    }
}

struct Bridge {
    chart: ChartFeed,
    equity_wire: Arc<WirePort>,
    generic_wire: Arc<WirePort>,
    equity_router: TickRouter,
    generic_router: TickRouter,
}

fn bridge(policy: UnsubscribePolicy) -> Bridge {
    let equity_registry = Arc::new(SubscriptionRegistry::new());
    let generic_registry = Arc::new(SubscriptionRegistry::new());
    let equity_wire = WirePort::new(FeedClass::Equity);
    let generic_wire = WirePort::new(FeedClass::Generic);

    let catalog = InstrumentCatalog::new([
        Instrument::from_code("TSLA.US", InstrumentClass::UsStock),
        Instrument::from_code("700.HK", InstrumentClass::HkStock),
        Instrument::from_code("BTCUSDT", InstrumentClass::Crypto),
        Instrument::from_code("XAUUSD", InstrumentClass::Metal),
    ]);

    let chart = ChartFeed::new(
        catalog,
        FeedChannel::new(Arc::clone(&equity_registry), equity_wire.clone()),
        FeedChannel::new(Arc::clone(&generic_registry), generic_wire.clone()),
        Arc::new(NoHistory),
        policy,
    );

    Bridge {
        chart,
        equity_wire,
        generic_wire,
        equity_router: TickRouter::new(FeedClass::Equity, equity_registry),
        generic_router: TickRouter::new(FeedClass::Generic, generic_registry),
    }
}

fn recorder() -> (BarCallback, Arc<Mutex<Vec<Bar>>>) {
    let received: Arc<Mutex<Vec<Bar>>> = Arc::default();
    let sink = Arc::clone(&received);
    (
        Arc::new(move |bar: &Bar| sink.lock().push(bar.clone())),
        received,
    )
}

fn tick(code: &str, ts: i64, price: Decimal) -> Tick {
    Tick {
        instrument_code: code.to_string(),
        timestamp_ms: ts,
        price,
        volume: dec!(1),
    }
}

#[test]
fn consumers_on_the_same_pair_share_bars() {
    let mut b = bridge(UnsubscribePolicy::Always);
    let (first_cb, first) = recorder();
    let (second_cb, second) = recorder();

    b.chart
        .subscribe("BTCUSDT", Resolution::Minute1, first_cb)
        .unwrap();
    b.chart
        .subscribe("BTCUSDT", Resolution::Minute1, second_cb)
        .unwrap();

    let outcome = b.generic_router.route(&tick("BTCUSDT", 5_000, dec!(42000)));
    assert_eq!(outcome.bars_delivered, 2);
    assert_eq!(*first.lock(), *second.lock());

    assert_eq!(
        b.generic_wire.sent(),
        vec![
            Wire::Subscribe("BTCUSDT".to_string()),
            Wire::Subscribe("BTCUSDT".to_string()),
        ]
    );
    assert!(b.equity_wire.sent().is_empty());
}

#[test]
fn equity_and_generic_ticks_stay_on_their_feed() {
    let mut b = bridge(UnsubscribePolicy::Always);
    let (stock_cb, stock) = recorder();
    let (gold_cb, gold) = recorder();

    b.chart
        .subscribe("700.HK", Resolution::Minute5, stock_cb)
        .unwrap();
    b.chart
        .subscribe("XAUUSD", Resolution::Minute5, gold_cb)
        .unwrap();

    b.equity_router.route(&tick("700.HK", 1_000, dec!(300)));
    b.generic_router.route(&tick("XAUUSD", 1_000, dec!(2300)));
    // Wrong feed: the generic router knows nothing about 700.HK.
    let stray = b.generic_router.route(&tick("700.HK", 2_000, dec!(999)));

    assert_eq!(stray.bars_delivered, 0);
    assert_eq!(stock.lock().len(), 1);
    assert_eq!(stock.lock()[0].high, dec!(300));
    assert_eq!(gold.lock().len(), 1);
    assert_eq!(b.equity_wire.sent(), vec![Wire::Subscribe("700.HK".to_string())]);
    assert_eq!(b.generic_wire.sent(), vec![Wire::Subscribe("XAUUSD".to_string())]);
}

#[test]
fn unsubscribe_stops_delivery_and_always_cancels() {
    let mut b = bridge(UnsubscribePolicy::Always);
    let (minute_cb, minute) = recorder();
    let (hour_cb, hour) = recorder();

    let minute_id = b
        .chart
        .subscribe("TSLA.US", Resolution::Minute1, minute_cb)
        .unwrap();
    b.chart
        .subscribe("TSLA.US", Resolution::Hour1, hour_cb)
        .unwrap();

    b.equity_router.route(&tick("TSLA.US", 1_000, dec!(250)));
    assert!(b.chart.unsubscribe(minute_id));
    assert!(!b.chart.unsubscribe(minute_id));
    b.equity_router.route(&tick("TSLA.US", 61_000, dec!(251)));

    assert_eq!(minute.lock().len(), 1);
    assert_eq!(hour.lock().len(), 2);
    assert_eq!(hour.lock()[1].close, dec!(251));

    // The hour subscriber still wants TSLA.US, but parity mode cancels anyway.
    assert_eq!(b.equity_wire.sent().last(), Some(&Wire::Cancel));
    assert_eq!(b.chart.stats(FeedClass::Equity).subscription_count, 1);
}

#[test]
fn last_reference_cancels_only_when_instrument_is_unused() {
    let b = bridge(UnsubscribePolicy::LastReference);
    let (a_cb, _a) = recorder();
    let (b_cb, _b) = recorder();

    let a = b
        .chart
        .subscribe("BTCUSDT", Resolution::Minute1, a_cb)
        .unwrap();
    let second = b
        .chart
        .subscribe("BTCUSDT", Resolution::Day1, b_cb)
        .unwrap();

    b.chart.unsubscribe(a);
    assert!(!b.generic_wire.sent().contains(&Wire::Cancel));

    b.chart.unsubscribe(second);
    assert_eq!(b.generic_wire.sent().last(), Some(&Wire::Cancel));

    let stats = b.chart.stats(FeedClass::Generic);
    assert_eq!(stats.subscription_count, 0);
    assert_eq!(stats.instrument_count, 0);
}
