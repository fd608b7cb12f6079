//! Observability wiring: `tracing-subscriber` with a JSON (or text) layer and
//! an optional OpenTelemetry OTLP exporter.
//!
//! The OTLP layer is installed only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set;
//! the exporter reads its endpoint and headers from the standard `OTEL_*`
//! variables itself.

use anyhow::Context;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::{Config, LogFormat};

/// Service name reported in logs and trace resources.
pub const SERVICE_NAME: &str = "push-relay";

const OTLP_ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Keeps the trace exporter alive until [`TelemetryGuard::shutdown`].
#[must_use = "dropping the guard without shutdown loses buffered spans"]
pub struct TelemetryGuard {
    provider: Option<TracerProvider>,
}

impl TelemetryGuard {
    /// Flushes and stops the trace exporter, if one was installed.
    pub fn shutdown(self) {
        if let Some(provider) = self.provider {
            if let Err(err) = provider.shutdown() {
                eprintln!("failed to shut down trace exporter: {err}");
            }
        }
    }
}

/// Installs the global subscriber. Must be called from within the tokio runtime.
pub fn init(config: &Config) -> anyhow::Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.debug)));

    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Text => fmt::layer().with_target(false).boxed(),
    };

    let provider = match std::env::var(OTLP_ENDPOINT_VAR) {
        Ok(endpoint) if !endpoint.trim().is_empty() => Some(
            tracer_provider(environment(config.deployment_id.as_deref()))
                .context("failed to initialise OTLP trace exporter")?,
        ),
        _ => None,
    };
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(SERVICE_NAME)));

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(otel_layer)
        .with(filter)
        .try_init()
        .context("failed to install tracing subscriber")?;

    if let Some(provider) = &provider {
        opentelemetry::global::set_tracer_provider(provider.clone());
    }

    Ok(TelemetryGuard { provider })
}

fn tracer_provider(environment: &'static str) -> anyhow::Result<TracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("deployment.environment", environment),
        ]))
        .build())
}

/// Filter used when `RUST_LOG` is unset.
fn default_directives(debug: bool) -> &'static str {
    if debug {
        "info,cli=debug,relay=debug,github=debug,webhook=debug,store=debug"
    } else {
        "info"
    }
}

/// `prod` for tagged deployments, `dev` otherwise.
fn environment(deployment_id: Option<&str>) -> &'static str {
    if deployment_id.is_some() {
        "prod"
    } else {
        "dev"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_raises_workspace_crates_only() {
        assert_eq!(default_directives(false), "info");
        let debug = default_directives(true);
        assert!(debug.starts_with("info,"));
        for target in ["cli", "relay", "github", "webhook", "store"] {
            assert!(debug.contains(&format!("{target}=debug")), "{target}");
        }
        assert!(EnvFilter::try_new(debug).is_ok());
    }

    #[test]
    fn environment_follows_deployment_id() {
        assert_eq!(environment(Some("abc123")), "prod");
        assert_eq!(environment(None), "dev");
    }
}
