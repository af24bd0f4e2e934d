//! Tracing and OpenTelemetry wiring for `coopctl`.
//!
//! - `tracing-subscriber` with an `EnvFilter` read from `RUST_LOG` (default
//!   `info`), plain or JSON formatted, written to stderr so stdout stays
//!   machine-readable.
//! - When `OTEL_EXPORTER_OTLP_ENDPOINT` is set: an OTLP span exporter bridged
//!   through `tracing-opentelemetry`, and an OTLP periodic metric reader
//!   installed as the global meter provider (this is where the
//!   `cooperation.participants` gauge ends up).

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::trace::TracerProvider;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable that switches on OTLP export.
pub const OTLP_ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

const SERVICE_NAME: &str = "coopctl";

/// Providers that must be flushed before the process exits.
#[derive(Debug, Default)]
pub struct Telemetry {
    tracer_provider: Option<TracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Telemetry {
    /// Flushes and shuts down the OTLP pipelines, if any were installed.
    pub fn shutdown(self) {
        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "Failed to flush span exporter");
            }
        }
        if let Some(provider) = self.meter_provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "Failed to flush metric exporter");
            }
        }
    }
}

/// Installs the global subscriber. Must be called from inside the tokio runtime.
pub fn init(json: bool) -> anyhow::Result<Telemetry> {
    let otlp = std::env::var_os(OTLP_ENDPOINT_VAR).is_some();

    let tracer_provider = if otlp {
        let exporter = opentelemetry_otlp::SpanExporter::builder().with_tonic().build()?;
        Some(
            TracerProvider::builder()
                .with_batch_exporter(exporter, runtime::Tokio)
                .build(),
        )
    } else {
        None
    };

    let meter_provider = if otlp {
        let exporter = opentelemetry_otlp::MetricExporter::builder().with_tonic().build()?;
        let reader = PeriodicReader::builder(exporter, runtime::Tokio).build();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();
        opentelemetry::global::set_meter_provider(provider.clone());
        Some(provider)
    } else {
        None
    };

    let otel_layer = tracer_provider
        .as_ref()
        .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter).with(otel_layer);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(Telemetry {
        tracer_provider,
        meter_provider,
    })
}
