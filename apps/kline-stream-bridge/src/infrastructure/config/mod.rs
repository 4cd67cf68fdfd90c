//! Configuration Module
//!
//! Environment-driven configuration for the bridge service.

mod settings;

pub use settings::{
    ApiToken, BridgeConfig, ConfigError, Endpoints, FeedSettings, HistorySettings,
    ServerSettings, WatchEntry, parse_watchlist,
};
