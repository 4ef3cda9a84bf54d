//! # Logging and OpenTelemetry helpers

use std::borrow::Cow;
use std::time::Duration;

use error_stack::{Result, ResultExt};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::global;
use opentelemetry_otlp::{MetricExporter, SpanExporter};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use tracing::Subscriber;
use tracing_opentelemetry::MetricsLayer;
use tracing_subscriber::{prelude::*, registry::LookupSpan, EnvFilter, Layer};

pub use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
pub use opentelemetry::KeyValue;

const OTEL_SDK_DISABLED: &str = "OTEL_SDK_DISABLED";
const RUST_LOG_FORMAT: &str = "RUST_LOG_FORMAT";

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

#[derive(Debug)]
pub struct OpenTelemetryInitError;
impl error_stack::Context for OpenTelemetryInitError {}

impl std::fmt::Display for OpenTelemetryInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("failed to initialize opentelemetry")
    }
}

/// Returns the named meter from the global meter provider.
///
/// Until [init_opentelemetry] installs an exporter this is a no-op meter, so
/// libraries and tests can record metrics unconditionally.
pub fn meter(name: &'static str) -> Meter {
    global::meter(name)
}

/// Initialize logging and (optionally) OpenTelemetry export.
///
/// Logs go to stdout, filtered by `RUST_LOG` (default `info`). Set
/// `RUST_LOG_FORMAT=json` for structured output. Traces and metrics are exported
/// over OTLP only when `OTEL_SDK_DISABLED` is set to something other than `true`.
///
/// ```rs
/// use escrow_observability::init_opentelemetry;
///
/// init_opentelemetry(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")).unwrap();
/// ```
pub fn init_opentelemetry(
    package_name: impl Into<Cow<'static, str>>,
    package_version: impl Into<Cow<'static, str>>,
) -> Result<(), OpenTelemetryInitError> {
    // The sdk ignores the disabled flag, and we default to disabled.
    let sdk_disabled = std::env::var(OTEL_SDK_DISABLED)
        .map(|v| v == "true")
        .unwrap_or(true);

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }

    let mut layers = vec![stdout()];

    if !sdk_disabled {
        let otel_layer = otel(package_name, package_version)?;
        layers.push(otel_layer);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .change_context(OpenTelemetryInitError)
        .attach_printable("global subscriber already installed")?;

    Ok(())
}

fn otel<S>(
    package_name: impl Into<Cow<'static, str>>,
    version: impl Into<Cow<'static, str>>,
) -> Result<BoxedLayer<S>, OpenTelemetryInitError>
where
    S: Subscriber + Send + Sync,
    for<'a> S: LookupSpan<'a>,
{
    let package_name = package_name.into();
    let version = version.into();

    let otel_env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("INFO"));

    let resource = Resource::new(vec![
        opentelemetry::KeyValue::new("service.name", package_name.to_string()),
        opentelemetry::KeyValue::new("service.version", version.to_string()),
    ]);

    let span_exporter = SpanExporter::builder()
        .with_tonic()
        .build()
        .change_context(OpenTelemetryInitError)
        .attach_printable("failed to create span exporter")?;

    let trace_provider = TracerProvider::builder()
        .with_resource(resource.clone())
        .with_batch_exporter(span_exporter, opentelemetry_sdk::runtime::Tokio)
        .build();

    let tracer = trace_provider.tracer(package_name);
    global::set_tracer_provider(trace_provider);

    let metrics_exporter = MetricExporter::builder()
        .with_tonic()
        .build()
        .change_context(OpenTelemetryInitError)
        .attach_printable("failed to create metrics exporter")?;

    let metrics_reader =
        PeriodicReader::builder(metrics_exporter, opentelemetry_sdk::runtime::Tokio)
            .with_interval(Duration::from_secs(10))
            .build();

    let meter_provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(metrics_reader)
        .build();

    global::set_meter_provider(meter_provider.clone());

    let otel_trace_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let otel_metrics_layer = MetricsLayer::new(meter_provider);
    let otel_layer = otel_trace_layer
        .and_then(otel_metrics_layer)
        .and_then(otel_env_filter)
        .boxed();

    Ok(otel_layer)
}

fn stdout<S>() -> BoxedLayer<S>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    let log_env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("INFO"));

    let json_fmt = std::env::var(RUST_LOG_FORMAT)
        .map(|val| val == "json")
        .unwrap_or(false);

    if json_fmt {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .json()
            .with_filter(log_env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(false)
            .compact()
            .with_filter(log_env_filter)
            .boxed()
    }
}
