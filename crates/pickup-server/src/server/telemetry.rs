//! Logs, traces and metrics.
//!
//! Events are always written to stdout through `tracing_subscriber::fmt`,
//! filtered by `RUST_LOG` (default `info`). Spans opened by the services wrap
//! the events logged inside them.
//!
//! ## Feature matrix
//!
//! - `tracing`: exports spans through OpenTelemetry.
//! - `metrics`: exports the backend's business counters
//!   (`issued_orders_total`, `created_returns_total`) through OpenTelemetry.
//! - `honeycomb`: OTLP exporter for Honeycomb (`HONEYCOMB_API_KEY`,
//!   `HONEYCOMB_DATASET`, `HONEYCOMB_ENDPOINT`, `HONEYCOMB_COMPRESSION`).
//! - `stdout`: stdout exporter.
//!
//! Exporters need at least one of `tracing` or `metrics`.
//!
//! ```bash
//! RUST_LOG=pickup_core=debug,info cargo run --bin pickup-server -- --log-format json
//! cargo run --bin pickup-server --features tracing,metrics,stdout
//! ```

#[cfg(all(
    feature = "honeycomb",
    not(any(feature = "tracing", feature = "metrics"))
))]
compile_error!(
    "The 'honeycomb' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

use super::config::LogFormat;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt::time::ChronoLocal, layer::Layered, layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
#[cfg(all(feature = "honeycomb", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;
#[cfg(feature = "honeycomb")]
use tonic::metadata::MetadataMap;
#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
use tonic::transport::ClientTlsConfig;

#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;

#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

const SERVICE: &str = "pickup";

pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and stops every exporter.
    pub fn shutdown(self) {
        #[cfg(feature = "tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

type Filtered = Layered<EnvFilter, Registry>;

fn log_layer(format: LogFormat) -> Box<dyn Layer<Filtered> + Send + Sync> {
    let layer = tracing_subscriber::fmt::layer()
        .with_thread_ids(true)
        .with_line_number(true)
        .with_target(false)
        .with_timer(ChronoLocal::rfc_3339())
        .with_file(true);

    match format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Json => layer
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .boxed(),
    }
}

pub fn init_telemetry(format: LogFormat) -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "tracing")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "tracing")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder(SERVICE)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(log_layer(format));

    #[cfg(feature = "tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        pickup_core::metrics::install(&meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "honeycomb")]
fn get_metadata() -> anyhow::Result<MetadataMap> {
    use anyhow::Context;

    let mut map = MetadataMap::new();
    let api_key = std::env::var("HONEYCOMB_API_KEY").context("missing `HONEYCOMB_API_KEY`")?;
    let dataset = std::env::var("HONEYCOMB_DATASET").context("missing `HONEYCOMB_DATASET`")?;
    map.insert(
        "x-honeycomb-team",
        api_key.parse().context("invalid API key")?,
    );
    map.insert(
        "x-honeycomb-dataset",
        dataset.parse().context("invalid dataset")?,
    );
    Ok(map)
}

#[cfg(feature = "honeycomb")]
fn honeycomb_endpoint() -> anyhow::Result<(String, Compression)> {
    use anyhow::Context;
    use std::str::FromStr;

    let endpoint = std::env::var("HONEYCOMB_ENDPOINT").context("missing `HONEYCOMB_ENDPOINT`")?;
    let raw = std::env::var("HONEYCOMB_COMPRESSION")
        .context("missing `HONEYCOMB_COMPRESSION`")?
        .to_ascii_lowercase();
    Ok((endpoint, Compression::from_str(&raw)?))
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let reader = sdkmetrics::PeriodicReader::builder(MetricExporter::default())
            .with_interval(std::time::Duration::from_secs(5))
            .build();
        builder.with_reader(reader)
    };

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let (endpoint, compression) = honeycomb_endpoint()?;
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(get_metadata()?)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(compression)
            .with_endpoint(endpoint)
            .with_protocol(Protocol::Grpc)
            .with_temporality(Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")?;
        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "tracing")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let batch = sdktrace::BatchSpanProcessor::builder(SpanExporter::default())
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let (endpoint, compression) = honeycomb_endpoint()?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(get_metadata()?)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(compression)
            .with_endpoint(endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build tracer exporter")?;

        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    Ok(builder.build())
}
