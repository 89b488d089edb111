//! Tracing setup for tether.
//!
//! With an OTLP endpoint configured, spans, logs and metrics are exported over
//! gRPC in addition to the console. Without one, only the console layer runs.

use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::metrics::Meter;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::ledger::{Ledger, LedgerStats};

/// Timeout for OTLP exports - prevents blocking on unavailable endpoints
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// `RUST_LOG` wins; otherwise the configured level, with tether itself at debug
/// when the level is the default.
fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if log_level == "info" {
            EnvFilter::new("info,tether=debug")
        } else {
            EnvFilter::new(log_level)
        }
    })
}

/// Console-only logging, used by the client subcommands and when no OTLP
/// endpoint is configured.
pub fn init_console(log_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialize tracing from the telemetry config.
pub fn init(config: &tetherconf::TelemetryConfig) -> Result<()> {
    match config.otlp() {
        Some(endpoint) => init_otlp(endpoint, &config.log_level),
        None => {
            init_console(&config.log_level);
            Ok(())
        }
    }
}

fn init_otlp(otlp_endpoint: &str, log_level: &str) -> Result<()> {
    let resource = Resource::builder_empty()
        .with_service_name("tether")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let endpoint = if otlp_endpoint.starts_with("http") {
        otlp_endpoint.to_string()
    } else {
        format!("http://{}", otlp_endpoint)
    };

    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP span exporter")?;

    let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_span_processor(
            opentelemetry_sdk::trace::BatchSpanProcessor::builder(trace_exporter).build(),
        )
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let tracer = tracer_provider.tracer("tether");
    global::set_tracer_provider(tracer_provider);

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP log exporter")?;

    let logger_provider = opentelemetry_sdk::logs::SdkLoggerProvider::builder()
        .with_log_processor(
            opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build(),
        )
        .with_resource(resource.clone())
        .build();

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP metric exporter")?;

    let meter_provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_reader(opentelemetry_sdk::metrics::PeriodicReader::builder(metric_exporter).build())
        .with_resource(resource)
        .build();
    global::set_meter_provider(meter_provider);

    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let log_appender =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .with(log_appender)
        .init();

    tracing::info!("OpenTelemetry initialized with OTLP endpoint: {}", otlp_endpoint);
    Ok(())
}

/// Monotonic ledger totals exported as observable counters.
const LEDGER_COUNTERS: [(&str, &str, fn(&LedgerStats) -> u64); 5] = [
    ("tether.requests.submitted", "Requests submitted by the dispatcher", |s| s.submitted),
    ("tether.requests.resolved", "Requests resolved by the plugin", |s| s.resolved),
    ("tether.requests.rejected", "Requests rejected by the plugin", |s| s.rejected),
    ("tether.requests.timed_out", "Requests that hit the timeout horizon", |s| s.timed_out),
    ("tether.requests.cleared", "Requests failed by disconnect or shutdown", |s| s.cleared),
];

/// Register ledger counters and the pending gauge on `meter`.
///
/// Values are read from [`Ledger::stats`] at collection time. Against the
/// default global meter (no OTLP endpoint) this is a no-op.
pub fn register_ledger_metrics(meter: &Meter, ledger: &Ledger) {
    for (name, description, read) in LEDGER_COUNTERS {
        let ledger = ledger.clone();
        meter
            .u64_observable_counter(name)
            .with_description(description)
            .with_callback(move |observer| observer.observe(read(&ledger.stats()), &[]))
            .build();
    }

    let ledger = ledger.clone();
    meter
        .u64_observable_gauge("tether.requests.pending")
        .with_description("Requests waiting for the plugin")
        .with_callback(move |observer| observer.observe(ledger.count() as u64, &[]))
        .build();
}

/// Meter for the bridge's own instruments.
pub fn meter() -> Meter {
    global::meter("tether")
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn counters_read_ledger_totals() {
        let ledger = Ledger::new(Duration::from_secs(30));
        let a = ledger.submit("/api/a", json!({}));
        let _b = ledger.submit("/api/b", json!({}));
        ledger.resolve(&a.id(), json!(1));
        ledger.clear_all();

        let stats = ledger.stats();
        let read: Vec<(&str, u64)> = LEDGER_COUNTERS
            .iter()
            .map(|(name, _, read)| (*name, read(&stats)))
            .collect();
        assert_eq!(
            read,
            vec![
                ("tether.requests.submitted", 2),
                ("tether.requests.resolved", 1),
                ("tether.requests.rejected", 0),
                ("tether.requests.timed_out", 0),
                ("tether.requests.cleared", 1),
            ]
        );
    }

    #[tokio::test]
    async fn registers_against_sdk_provider() {
        let provider = SdkMeterProvider::builder().build();
        let ledger = Ledger::new(Duration::from_secs(30));
        register_ledger_metrics(&provider.meter("tether-test"), &ledger);
        register_ledger_metrics(&meter(), &ledger);
    }
}
