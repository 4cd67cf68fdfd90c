#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Kline Stream Bridge - Tick Aggregation and Subscription Multiplexer
//!
//! Keeps one self-healing WebSocket connection per feed class to the tick
//! feed, folds raw trades into time-aligned OHLCV bars and fans them out to
//! any number of subscribers, each at its own resolution. Historical bars
//! come from the REST kline endpoint.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: Core aggregation logic and data types
//!   - `streaming`: Ticks, bars, resolutions and the bar book
//!   - `instrument`: Instrument classes and the symbol catalog
//!   - `subscription`: Subscription registry
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Feed command and history interfaces
//!   - `services`: Tick routing, backfill and the chart façade
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: Quote socket client with heartbeat and reconnect
//!   - `history`: REST kline client
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! equity socket  ──► FeedConnection ──► TickRouter ──┐
//!                                                    ├──► BarCallback × N
//! generic socket ──► FeedConnection ──► TickRouter ──┘
//!
//! ChartFeed::subscribe ──► SubscriptionRegistry + subscribe command
//! ChartFeed::fetch_history ──► BackfillService ──► KlineHistoryClient
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core aggregation types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::instrument::{
    FeedClass, Instrument, InstrumentCatalog, InstrumentClass, SymbolProfile,
};
pub use domain::streaming::{Bar, BarBook, Resolution, Tick};
pub use domain::subscription::{
    BarCallback, SubscriptionId, SubscriptionRegistry, SubscriptionStats, UnsubscribePolicy,
};

// Application
pub use application::ports::{BackfillError, FeedCommandPort, HistoryPort, HistoryRequest};
pub use application::services::{ChartFeed, FeedChannel, FeedError, HistoryResult, TickRouter};

// Infrastructure config
pub use infrastructure::config::{ApiToken, BridgeConfig, ConfigError, Endpoints, WatchEntry};

// Feed client
pub use infrastructure::feed::{
    ConnectionState, FeedConnection, FeedConnectionConfig, FeedEvent, FeedRuntime, spawn_feed,
};

// History client
pub use infrastructure::history::KlineHistoryClient;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
