//! Logging and Span Export
//!
//! Every bridge log line goes through `tracing`. This module installs the
//! subscriber: a stdout formatter filtered by `RUST_LOG` on top of the
//! bridge's own defaults, and, when a collector is configured, an OTLP
//! (gRPC) span exporter.
//!
//! Export is opt-in. A bridge started without a collector logs to stdout
//! only and never retries a dead OTLP endpoint.
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: collector address; setting it enables export
//! - `OTEL_ENABLED`: `true` exports to the default collector, `false` disables
//!   export even when an endpoint is set
//! - `OTEL_SERVICE_NAME`: span service name (default: kline-stream-bridge)
//! - `RUST_LOG`: filter directives layered over [`DEFAULT_DIRECTIVES`]

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_SERVICE_NAME: &str = "kline-stream-bridge";

/// Collector address used when export is enabled without an endpoint.
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Directives applied on top of `RUST_LOG`. The socket and HTTP stacks are
/// chatty at info.
pub const DEFAULT_DIRECTIVES: [&str; 4] = [
    "kline_stream_bridge=info",
    "tungstenite=warn",
    "hyper=warn",
    "reqwest=warn",
];

/// Flushes pending spans when dropped. Hold it for the life of `main`.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported.
    #[must_use]
    pub const fn exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to flush span exporter: {e}");
        }
    }
}

/// Span export settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Collector address, `None` when export is off.
    pub otlp_endpoint: Option<String>,
    /// Service name attached to exported spans.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let endpoint = get("OTEL_EXPORTER_OTLP_ENDPOINT");
        let otlp_endpoint = match get("OTEL_ENABLED").map(|v| v.to_lowercase()).as_deref() {
            Some("false" | "0") => None,
            Some("true" | "1") => Some(endpoint.unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string())),
            _ => endpoint,
        };

        Self {
            otlp_endpoint,
            service_name: get("OTEL_SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
        }
    }
}

/// Install the subscriber from environment settings.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

/// Install the subscriber.
///
/// An exporter that cannot be built is reported and skipped; stdout
/// logging still comes up.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = DEFAULT_DIRECTIVES
        .iter()
        .filter_map(|d| d.parse::<Directive>().ok())
        .fold(EnvFilter::from_default_env(), EnvFilter::add_directive);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let exporter = config.otlp_endpoint.as_deref().map(|endpoint| {
        opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
    });

    let (tracer_provider, export_error) = match exporter {
        Some(Ok(exporter)) => {
            let provider = SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_resource(
                    opentelemetry_sdk::Resource::builder()
                        .with_service_name(config.service_name.clone())
                        .build(),
                )
                .build();
            (Some(provider), None)
        }
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let otel_layer = tracer_provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    if let Some(e) = export_error {
        tracing::warn!(error = %e, "Span export disabled, exporter could not be built");
    } else if let Some(endpoint) = &config.otlp_endpoint {
        tracing::debug!(endpoint, service = %config.service_name, "Exporting spans");
    }

    TelemetryGuard { tracer_provider }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> TelemetryConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        TelemetryConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn export_is_off_without_a_collector() {
        assert_eq!(config(&[]), TelemetryConfig::default());
        assert!(config(&[("OTEL_EXPORTER_OTLP_ENDPOINT", "  ")]).otlp_endpoint.is_none());
    }

    #[test]
    fn endpoint_enables_export_unless_disabled() {
        let enabled = config(&[("OTEL_EXPORTER_OTLP_ENDPOINT", "http://otel:4317")]);
        assert_eq!(enabled.otlp_endpoint.as_deref(), Some("http://otel:4317"));

        let disabled = config(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://otel:4317"),
            ("OTEL_ENABLED", "FALSE"),
        ]);
        assert!(disabled.otlp_endpoint.is_none());
    }

    #[test]
    fn enabled_flag_falls_back_to_local_collector() {
        let config = config(&[("OTEL_ENABLED", "true"), ("OTEL_SERVICE_NAME", "bridge-a")]);
        assert_eq!(config.otlp_endpoint.as_deref(), Some(DEFAULT_OTLP_ENDPOINT));
        assert_eq!(config.service_name, "bridge-a");
    }

    #[test]
    fn default_directives_parse() {
        for directive in DEFAULT_DIRECTIVES {
            assert!(directive.parse::<Directive>().is_ok());
        }
    }
}
