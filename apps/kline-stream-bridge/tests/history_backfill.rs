//! History Backfill Integration Tests
//!
//! Drives `ChartFeed::fetch_history` against a mock kline endpoint.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kline_stream_bridge::domain::instrument::FeedClass;
use kline_stream_bridge::infrastructure::config::HistorySettings;
use kline_stream_bridge::{
    ApiToken, ChartFeed, Endpoints, FeedChannel, FeedCommandPort, FeedError, HistoryResult,
    Instrument, InstrumentCatalog, InstrumentClass, KlineHistoryClient, Resolution,
    SubscriptionRegistry, UnsubscribePolicy,
};

/// A feed that is never open.
struct ClosedFeed(FeedClass);

impl FeedCommandPort for ClosedFeed {
    fn feed(&self) -> FeedClass {
        self.0
    }

    fn is_open(&self) -> bool {
        false
    }

    fn subscribe(&self, _instrument_code: &str) -> bool {
        false
    }

    fn cancel(&self) -> bool {
        false
    }
}

fn chart(server: &MockServer) -> ChartFeed {
    let endpoints = Endpoints {
        equity_kline: format!("{}/quote-stock-b-api/kline", server.uri()),
        generic_kline: format!("{}/quote-b-api/kline", server.uri()),
        ..Endpoints::default()
    };
    let settings = HistorySettings {
        timeout: Duration::from_secs(2),
    };
    let client =
        KlineHistoryClient::new(ApiToken::new("tok").unwrap(), &endpoints, &settings).unwrap();

    let catalog = InstrumentCatalog::new([
        Instrument::from_code("EURUSD", InstrumentClass::Forex),
        Instrument::from_code("AAPL.US", InstrumentClass::UsStock),
    ]);

    ChartFeed::new(
        catalog,
        FeedChannel::new(
            Arc::new(SubscriptionRegistry::new()),
            Arc::new(ClosedFeed(FeedClass::Equity)),
        ),
        FeedChannel::new(
            Arc::new(SubscriptionRegistry::new()),
            Arc::new(ClosedFeed(FeedClass::Generic)),
        ),
        Arc::new(client),
        UnsubscribePolicy::default(),
    )
}

fn klines(items: &[(i64, &str)]) -> Value {
    let list: Vec<Value> = items
        .iter()
        .map(|(ts, close)| {
            json!({
                "timestamp": ts.to_string(),
                "open_price": "1.0",
                "high_price": "2.0",
                "low_price": "0.5",
                "close_price": close,
                "volume": "10",
                "turnover": "0"
            })
        })
        .collect();
    json!({ "ret": 200, "msg": "ok", "trace": "t", "data": { "kline_list": list } })
}

/// The decoded `query` parameter of every request the server saw.
async fn queries(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|req| {
            let (_, raw) = req
                .url
                .query_pairs()
                .find(|(k, _)| k == "query")
                .expect("query parameter");
            serde_json::from_str(&raw).unwrap()
        })
        .collect()
}

#[tokio::test]
async fn generic_history_is_sorted_and_in_millis() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quote-b-api/kline"))
        .and(query_param("token", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(klines(&[
            (1_700_003_600, "1.2"),
            (1_700_000_000, "1.1"),
        ])))
        .mount(&server)
        .await;

    let chart = chart(&server);
    let result = chart
        .fetch_history("EURUSD", Resolution::Hour1, 1_700_007_200, 500)
        .await
        .unwrap();

    let bars = result.bars();
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].time, 1_700_000_000_000);
    assert_eq!(bars[0].close, dec!(1.1));
    assert_eq!(bars[1].time, 1_700_003_600_000);
    assert_eq!(bars[1].volume, dec!(10));

    let sent = queries(&server).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["data"]["code"], "EURUSD");
    assert_eq!(sent[0]["data"]["kline_type"], 5);
    assert_eq!(sent[0]["data"]["kline_timestamp_end"], 1_700_007_200_i64);
    assert_eq!(sent[0]["data"]["query_kline_num"], 500);
}

#[tokio::test]
async fn generic_history_may_be_paged_repeatedly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quote-b-api/kline"))
        .respond_with(ResponseTemplate::new(200).set_body_json(klines(&[(1_700_000_000, "1")])))
        .mount(&server)
        .await;

    let chart = chart(&server);
    for end in [0, 1_700_000_000] {
        let result = chart
            .fetch_history("EURUSD", Resolution::Minute1, end, 100)
            .await
            .unwrap();
        assert_eq!(result.bars().len(), 1);
    }
    assert_eq!(queries(&server).await.len(), 2);
}

#[tokio::test]
async fn equity_history_is_fetched_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quote-stock-b-api/kline"))
        .respond_with(ResponseTemplate::new(200).set_body_json(klines(&[(1_700_000_000, "190")])))
        .mount(&server)
        .await;

    let chart = chart(&server);
    let first = chart
        .fetch_history("AAPL.US", Resolution::Day1, 1_700_000_000, 1000)
        .await
        .unwrap();
    assert_eq!(first.bars().len(), 1);

    let second = chart
        .fetch_history("AAPL.US", Resolution::Day1, 1_699_000_000, 1000)
        .await
        .unwrap();
    assert_eq!(second, HistoryResult::NoData);

    let sent = queries(&server).await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0]["data"].get("kline_timestamp_end").is_none());

    // Another resolution is its own pair.
    let weekly = chart
        .fetch_history("AAPL.US", Resolution::Week1, 0, 1000)
        .await
        .unwrap();
    assert!(!weekly.is_no_data());
}

#[tokio::test]
async fn empty_equity_history_can_be_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quote-stock-b-api/kline"))
        .respond_with(ResponseTemplate::new(200).set_body_json(klines(&[])))
        .mount(&server)
        .await;

    let chart = chart(&server);
    for _ in 0..2 {
        let result = chart
            .fetch_history("AAPL.US", Resolution::Minute15, 0, 1000)
            .await
            .unwrap();
        assert!(result.is_no_data());
    }
    assert_eq!(queries(&server).await.len(), 2);
}

#[tokio::test]
async fn upstream_failures_read_as_no_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quote-b-api/kline"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ret": 600,
            "msg": "code invalid",
            "trace": "t",
            "data": null
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/quote-stock-b-api/kline"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let chart = chart(&server);
    let rejected = chart
        .fetch_history("EURUSD", Resolution::Minute5, 0, 10)
        .await
        .unwrap();
    assert!(rejected.is_no_data());

    let failed = chart
        .fetch_history("AAPL.US", Resolution::Hour1, 0, 10)
        .await
        .unwrap();
    assert!(failed.is_no_data());
}

#[tokio::test]
async fn unsupported_and_unknown_requests_never_reach_the_server() {
    let server = MockServer::start().await;
    let chart = chart(&server);

    let err = chart
        .fetch_history("AAPL.US", Resolution::Hour4, 0, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, FeedError::UnsupportedResolution { .. }));

    let err = chart
        .fetch_history("NOPE", Resolution::Minute1, 0, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, FeedError::Catalog(_)));

    assert!(queries(&server).await.is_empty());
}
