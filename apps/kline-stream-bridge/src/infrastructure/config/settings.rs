//! Bridge Configuration Settings
//!
//! Configuration types for the kline bridge, loaded from environment variables.

use std::time::Duration;

use crate::domain::instrument::{FeedClass, Instrument, InstrumentClass};
use crate::domain::streaming::Resolution;
use crate::domain::subscription::UnsubscribePolicy;
use crate::infrastructure::feed::heartbeat::HeartbeatConfig;
use crate::infrastructure::feed::reconnect::BackoffConfig;

/// Quote service access token.
///
/// Travels as the `token` query parameter on every socket and REST URL.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    /// Wrap a token.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyValue` for a blank token.
    pub fn new(token: impl Into<String>) -> Result<Self, ConfigError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ConfigError::EmptyValue("ALLTICK_API_TOKEN".to_string()));
        }
        Ok(Self(token))
    }

    /// The raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiToken([REDACTED])")
    }
}

/// Service endpoints per feed class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Equity tick socket, ending in `token=`.
    pub equity_ws: String,
    /// Forex/metal/crypto tick socket, ending in `token=`.
    pub generic_ws: String,
    /// Equity history endpoint.
    pub equity_kline: String,
    /// Forex/metal/crypto history endpoint.
    pub generic_kline: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            equity_ws: "wss://quote.alltick.io/quote-stock-b-ws-api?token=".to_string(),
            generic_ws: "wss://quote.alltick.io/quote-b-ws-api?token=".to_string(),
            equity_kline: "https://quote.alltick.io/quote-stock-b-api/kline".to_string(),
            generic_kline: "https://quote.alltick.io/quote-b-api/kline".to_string(),
        }
    }
}

impl Endpoints {
    /// Socket endpoint for a feed class.
    #[must_use]
    pub fn ws_for(&self, feed: FeedClass) -> &str {
        match feed {
            FeedClass::Equity => &self.equity_ws,
            FeedClass::Generic => &self.generic_ws,
        }
    }

    /// History endpoint for a feed class.
    #[must_use]
    pub fn kline_for(&self, feed: FeedClass) -> &str {
        match feed {
            FeedClass::Equity => &self.equity_kline,
            FeedClass::Generic => &self.generic_kline,
        }
    }
}

/// Feed connection settings, shared by both feed classes.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    /// Keep-alive interval.
    pub heartbeat_interval: Duration,
    /// Inbound silence that forces a reconnect (`None` = disabled).
    pub liveness_timeout: Option<Duration>,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Reconnection jitter fraction.
    pub reconnect_jitter: f64,
    /// Outbound command queue capacity per connection.
    pub outbound_capacity: usize,
    /// Feed event channel capacity per connection.
    pub event_capacity: usize,
    /// When unsubscribes cancel on the wire.
    pub unsubscribe_policy: UnsubscribePolicy,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            liveness_timeout: None,
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.1,
            outbound_capacity: 256,
            event_capacity: 4096,
            unsubscribe_policy: UnsubscribePolicy::Always,
        }
    }
}

impl FeedSettings {
    /// Backoff parameters for reconnects.
    #[must_use]
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.reconnect_delay_initial,
            max_delay: self.reconnect_delay_max,
            multiplier: self.reconnect_delay_multiplier,
            jitter: self.reconnect_jitter,
        }
    }

    /// Heartbeat parameters.
    #[must_use]
    pub const fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: self.heartbeat_interval,
            liveness_timeout: self.liveness_timeout,
        }
    }
}

/// History REST settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySettings {
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// One watchlist entry: an instrument and the resolutions to stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEntry {
    /// Catalog instrument.
    pub instrument: Instrument,
    /// Resolutions to subscribe.
    pub resolutions: Vec<Resolution>,
}

/// Parse `CODE@class[:res,res];CODE@class…`.
///
/// Resolutions default to `1` (one minute).
///
/// # Errors
///
/// Returns `ConfigError::InvalidWatchlist` for malformed entries, unknown
/// classes or resolutions, or resolutions the class does not offer.
pub fn parse_watchlist(raw: &str) -> Result<Vec<WatchEntry>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_watch_entry)
        .collect()
}

fn parse_watch_entry(entry: &str) -> Result<WatchEntry, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidWatchlist(format!("{entry}: {reason}"));

    let (target, resolutions) = entry.split_once(':').unwrap_or((entry, "1"));
    let (code, class) = target
        .split_once('@')
        .ok_or_else(|| invalid("expected CODE@class".to_string()))?;
    let code = code.trim();
    if code.is_empty() {
        return Err(invalid("empty instrument code".to_string()));
    }

    let class: InstrumentClass = class.trim().parse().map_err(|e| invalid(format!("{e}")))?;

    let resolutions = resolutions
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|r| {
            let resolution: Resolution = r.parse().map_err(|e| invalid(format!("{e}")))?;
            if class.supports(resolution) {
                Ok(resolution)
            } else {
                Err(invalid(format!("{resolution} is not offered for {class}")))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(WatchEntry {
        instrument: Instrument::from_code(code, class),
        resolutions,
    })
}

/// Complete bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Access token.
    pub token: ApiToken,
    /// Service endpoints.
    pub endpoints: Endpoints,
    /// Feed connection settings.
    pub feed: FeedSettings,
    /// History settings.
    pub history: HistorySettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Instruments to stream at startup.
    pub watchlist: Vec<WatchEntry>,
}

impl BridgeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is missing or the watchlist is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is missing or the watchlist is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let token = env
            .get("ALLTICK_API_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnvVar("ALLTICK_API_TOKEN".to_string()))?;
        let token = ApiToken::new(token)?;

        let defaults = Endpoints::default();
        let endpoints = Endpoints {
            equity_ws: env.string("BRIDGE_EQUITY_WS_URL", defaults.equity_ws),
            generic_ws: env.string("BRIDGE_GENERIC_WS_URL", defaults.generic_ws),
            equity_kline: env.string("BRIDGE_EQUITY_KLINE_URL", defaults.equity_kline),
            generic_kline: env.string("BRIDGE_GENERIC_KLINE_URL", defaults.generic_kline),
        };

        let defaults = FeedSettings::default();
        let liveness_secs = env.parse::<u64>("BRIDGE_LIVENESS_TIMEOUT_SECS", 0);
        let feed = FeedSettings {
            heartbeat_interval: env.duration_secs(
                "BRIDGE_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            liveness_timeout: (liveness_secs > 0).then(|| Duration::from_secs(liveness_secs)),
            reconnect_delay_initial: env.duration_millis(
                "BRIDGE_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "BRIDGE_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "BRIDGE_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter: env.parse("BRIDGE_RECONNECT_JITTER", defaults.reconnect_jitter),
            outbound_capacity: env
                .parse("BRIDGE_OUTBOUND_CAPACITY", defaults.outbound_capacity)
                .max(1),
            event_capacity: env
                .parse("BRIDGE_EVENT_CAPACITY", defaults.event_capacity)
                .max(1),
            unsubscribe_policy: env
                .get("BRIDGE_UNSUBSCRIBE_POLICY")
                .map(|s| UnsubscribePolicy::from_str_case_insensitive(&s))
                .unwrap_or_default(),
        };

        let history = HistorySettings {
            timeout: env.duration_secs(
                "BRIDGE_HISTORY_TIMEOUT_SECS",
                HistorySettings::default().timeout,
            ),
        };

        let server = ServerSettings {
            health_port: env.parse("BRIDGE_HEALTH_PORT", ServerSettings::default().health_port),
        };

        let watchlist = match env.get("BRIDGE_WATCHLIST") {
            Some(raw) => parse_watchlist(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            token,
            endpoints,
            feed,
            history,
            server,
            watchlist,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Watchlist entry could not be parsed.
    #[error("invalid watchlist entry {0}")]
    InvalidWatchlist(String),
}

/// Variable lookup with typed fallbacks.
struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.get(key).unwrap_or(default)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Zero falls back to `default`.
    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&secs| secs > 0)
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn token_is_required() {
        let err = BridgeConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "ALLTICK_API_TOKEN"));
        assert!(ApiToken::new("  ").is_err());
    }

    #[test]
    fn defaults_apply() {
        let config = BridgeConfig::from_lookup(lookup(&[("ALLTICK_API_TOKEN", "abc")])).unwrap();
        assert_eq!(config.token.expose(), "abc");
        assert_eq!(config.endpoints, Endpoints::default());
        assert_eq!(config.feed, FeedSettings::default());
        assert_eq!(config.history.timeout, Duration::from_secs(10));
        assert_eq!(config.server.health_port, 8083);
        assert!(config.watchlist.is_empty());
        assert!(config.feed.liveness_timeout.is_none());
    }

    #[test]
    fn overrides_apply() {
        let config = BridgeConfig::from_lookup(lookup(&[
            ("ALLTICK_API_TOKEN", "abc"),
            ("BRIDGE_GENERIC_WS_URL", "ws://127.0.0.1:9000/?token="),
            ("BRIDGE_HEARTBEAT_INTERVAL_SECS", "5"),
            ("BRIDGE_LIVENESS_TIMEOUT_SECS", "30"),
            ("BRIDGE_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("BRIDGE_UNSUBSCRIBE_POLICY", "last_reference"),
            ("BRIDGE_OUTBOUND_CAPACITY", "0"),
            ("BRIDGE_HEALTH_PORT", "not-a-port"),
        ]))
        .unwrap();

        assert_eq!(config.endpoints.ws_for(FeedClass::Generic), "ws://127.0.0.1:9000/?token=");
        assert_eq!(config.feed.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.feed.liveness_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.feed.backoff().initial_delay, Duration::from_millis(250));
        assert_eq!(config.feed.unsubscribe_policy, UnsubscribePolicy::LastReference);
        assert_eq!(config.feed.outbound_capacity, 1);
        assert_eq!(config.server.health_port, 8083);
    }

    #[test]
    fn zero_heartbeat_keeps_default() {
        let config = BridgeConfig::from_lookup(lookup(&[
            ("ALLTICK_API_TOKEN", "abc"),
            ("BRIDGE_HEARTBEAT_INTERVAL_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.feed.heartbeat_interval, Duration::from_secs(10));
    }

    #[test]
    fn token_redacted_debug() {
        let token = ApiToken::new("secret-token").unwrap();
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn endpoints_by_feed() {
        let endpoints = Endpoints::default();
        assert!(endpoints.ws_for(FeedClass::Equity).contains("quote-stock-b-ws-api"));
        assert!(endpoints.ws_for(FeedClass::Generic).contains("quote-b-ws-api"));
        assert!(endpoints.kline_for(FeedClass::Equity).ends_with("quote-stock-b-api/kline"));
        assert!(endpoints.kline_for(FeedClass::Generic).ends_with("quote-b-api/kline"));
    }

    #[test]
    fn watchlist_parsing() {
        let entries = parse_watchlist("BTCUSDT@crypto:1,5; AAPL.US@us_stock:1D ;EURUSD@forex").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].instrument.ticker, "BTCUSDT");
        assert_eq!(
            entries[0].resolutions,
            vec![Resolution::Minute1, Resolution::Minute5]
        );
        assert_eq!(entries[1].instrument.class, InstrumentClass::UsStock);
        assert_eq!(entries[1].resolutions, vec![Resolution::Day1]);
        assert_eq!(entries[2].resolutions, vec![Resolution::Minute1]);
    }

    #[test]
    fn watchlist_rejects_bad_entries() {
        assert!(parse_watchlist("BTCUSDT").is_err());
        assert!(parse_watchlist("BTCUSDT@bonds").is_err());
        assert!(parse_watchlist("BTCUSDT@crypto:7").is_err());
        // 4h is not served for equities
        assert!(parse_watchlist("700.HK@hk_stock:240").is_err());
        assert!(parse_watchlist("").unwrap().is_empty());
    }
}
