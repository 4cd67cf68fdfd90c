//! Historical Bars Client
//!
//! `HistoryPort` adapter for the kline REST endpoints.
//!
//! # Request
//!
//! `GET <endpoint>?token=<token>&query=<json>` where `query` is
//!
//! ```json
//! {"trace": "<uuid>", "data": {"code": "EURUSD", "kline_type": 5,
//!  "kline_timestamp_end": 0, "query_kline_num": 1000, "adjust_type": 0}}
//! ```
//!
//! Equity queries omit `kline_timestamp_end`; the service always answers
//! them with the most recent page.
//!
//! # Response
//!
//! `kline_list` entries carry decimal strings and a `timestamp` in epoch
//! seconds; bars are returned with millisecond times, oldest first.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::ports::{BackfillError, HistoryPort, HistoryRequest};
use crate::domain::instrument::FeedClass;
use crate::domain::streaming::Bar;
use crate::infrastructure::config::{ApiToken, Endpoints, HistorySettings};
use crate::infrastructure::feed::messages::{lenient_decimal, lenient_i64};

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct KlineQuery<'a> {
    trace: String,
    data: KlineQueryData<'a>,
}

#[derive(Debug, Serialize)]
struct KlineQueryData<'a> {
    code: &'a str,
    kline_type: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    kline_timestamp_end: Option<i64>,
    query_kline_num: u32,
    adjust_type: u8,
}

#[derive(Debug, Deserialize)]
struct KlineResponse {
    ret: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(default)]
    kline_list: Vec<KlineItem>,
}

#[derive(Debug, Deserialize)]
struct KlineItem {
    #[serde(deserialize_with = "lenient_i64")]
    timestamp: i64,
    #[serde(deserialize_with = "lenient_decimal")]
    open_price: Decimal,
    #[serde(deserialize_with = "lenient_decimal")]
    high_price: Decimal,
    #[serde(deserialize_with = "lenient_decimal")]
    low_price: Decimal,
    #[serde(deserialize_with = "lenient_decimal")]
    close_price: Decimal,
    #[serde(deserialize_with = "lenient_decimal")]
    volume: Decimal,
}

impl From<KlineItem> for Bar {
    fn from(item: KlineItem) -> Self {
        Self {
            time: item.timestamp.saturating_mul(1000),
            open: item.open_price,
            high: item.high_price,
            low: item.low_price,
            close: item.close_price,
            volume: item.volume,
        }
    }
}

/// The service reports success as `ret` 0 or 200.
const fn is_success(ret: i64) -> bool {
    ret == 0 || ret == 200
}

// =============================================================================
// Client
// =============================================================================

/// REST client for historical bars.
#[derive(Debug, Clone)]
pub struct KlineHistoryClient {
    client: Client,
    token: ApiToken,
    equity_url: String,
    generic_url: String,
}

impl KlineHistoryClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `BackfillError::Http` if the HTTP client cannot be built.
    pub fn new(
        token: ApiToken,
        endpoints: &Endpoints,
        settings: &HistorySettings,
    ) -> Result<Self, BackfillError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| BackfillError::Http(e.to_string()))?;

        Ok(Self {
            client,
            token,
            equity_url: endpoints.kline_for(FeedClass::Equity).to_string(),
            generic_url: endpoints.kline_for(FeedClass::Generic).to_string(),
        })
    }

    fn url_for(&self, feed: FeedClass) -> &str {
        match feed {
            FeedClass::Equity => &self.equity_url,
            FeedClass::Generic => &self.generic_url,
        }
    }

    fn query_json(request: &HistoryRequest) -> Result<String, BackfillError> {
        let query = KlineQuery {
            trace: uuid::Uuid::new_v4().to_string(),
            data: KlineQueryData {
                code: &request.instrument_code,
                kline_type: request.resolution.kline_type(),
                kline_timestamp_end: (!request.class.is_equity())
                    .then_some(request.end_timestamp_secs),
                query_kline_num: request.clamped_count(),
                adjust_type: request.adjust.code(),
            },
        };
        serde_json::to_string(&query).map_err(|e| BackfillError::Decode(e.to_string()))
    }
}

#[async_trait]
impl HistoryPort for KlineHistoryClient {
    async fn fetch_history(&self, request: &HistoryRequest) -> Result<Vec<Bar>, BackfillError> {
        if !request.class.supports(request.resolution) {
            return Err(BackfillError::UnsupportedResolution {
                resolution: request.resolution,
                class: request.class,
            });
        }

        let url = self.url_for(request.class.feed_class());
        let query = Self::query_json(request)?;

        tracing::debug!(
            code = %request.instrument_code,
            resolution = %request.resolution,
            end = request.end_timestamp_secs,
            count = request.clamped_count(),
            "Fetching history"
        );

        let response = self
            .client
            .get(url)
            .query(&[("token", self.token.expose()), ("query", query.as_str())])
            .send()
            .await
            .map_err(|e| BackfillError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackfillError::Status(status.as_u16()));
        }

        let body: KlineResponse = response
            .json()
            .await
            .map_err(|e| BackfillError::Decode(e.to_string()))?;

        if !is_success(body.ret) {
            return Err(BackfillError::Rejected {
                ret: body.ret,
                msg: body.msg,
            });
        }

        let mut bars: Vec<Bar> = body
            .data
            .map(|data| data.kline_list)
            .unwrap_or_default()
            .into_iter()
            .map(Bar::from)
            .collect();
        bars.sort_by_key(|bar| bar.time);

        Ok(bars)
    }
}
