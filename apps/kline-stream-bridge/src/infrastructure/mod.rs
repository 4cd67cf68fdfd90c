//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration from environment variables.
pub mod config;

/// Quote socket client: codec, heartbeat, reconnect and the connection.
pub mod feed;

/// Health check HTTP endpoint.
pub mod health;

/// REST client for historical klines.
pub mod history;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
