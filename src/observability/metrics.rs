//! OpenTelemetry metrics for progress hubs.
//!
//! Key metrics:
//! - tidemark_advance_total: Counter for progress advances
//! - tidemark_released_total: Counter for waiters released by an advance
//! - tidemark_wait_outcomes_total: Counter for wait resolutions, by outcome
//! - tidemark_wait_latency_seconds: Histogram for time spent registered
//! - tidemark_done_upto: Gauge for the current progress marker
//! - tidemark_waiting: Gauge for outstanding waiters

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::reader::MetricReader;
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::{Arc, OnceLock};

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Tidemark metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Total number of advances that moved progress forward.
    pub advance_total: Counter<u64>,
    /// Total number of waiters released by advances.
    pub released_total: Counter<u64>,
    /// Total number of resolved waits, labelled by outcome.
    pub wait_outcomes_total: Counter<u64>,
    /// Histogram of registered wait duration in seconds.
    pub wait_latency: Histogram<f64>,
    /// Gauge of the current progress marker.
    pub done_upto: Gauge<u64>,
    /// Gauge of outstanding waiters.
    pub waiting: Gauge<u64>,
}

impl Metrics {
    /// Create a new metrics registry from a meter.
    fn new(meter: &Meter) -> Self {
        Self {
            advance_total: meter
                .u64_counter("tidemark_advance_total")
                .with_description("Advances that moved the progress marker forward")
                .with_unit("1")
                .init(),
            released_total: meter
                .u64_counter("tidemark_released_total")
                .with_description("Waiters released because progress reached their target")
                .with_unit("1")
                .init(),
            wait_outcomes_total: meter
                .u64_counter("tidemark_wait_outcomes_total")
                .with_description("Resolved waits by outcome")
                .with_unit("1")
                .init(),
            wait_latency: meter
                .f64_histogram("tidemark_wait_latency_seconds")
                .with_description("Time a registered waiter spent blocked")
                .with_unit("s")
                .init(),
            done_upto: meter
                .u64_gauge("tidemark_done_upto")
                .with_description("Current progress marker")
                .with_unit("1")
                .init(),
            waiting: meter
                .u64_gauge("tidemark_waiting")
                .with_description("Outstanding registered waiters")
                .with_unit("1")
                .init(),
        }
    }
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
///
/// # Arguments
///
/// * `otel_endpoint` - Optional OTLP endpoint for metrics export
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        if let Some(endpoint) = otel_endpoint {
            use opentelemetry_otlp::{Protocol, WithExportConfig};

            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc);

            match opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_period(std::time::Duration::from_secs(10))
                .build()
            {
                Ok(provider) => {
                    global::set_meter_provider(provider);
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP exporter, using no-op metrics");
                    install_reader(ManualReader::builder().build());
                }
            }
        } else {
            // Recorded but not exported
            install_reader(ManualReader::builder().build());
        }

        Metrics::new(&global::meter("tidemark"))
    });
}

/// Initialize the metrics system with a caller-supplied reader.
///
/// Use this for pull-based collection. Ignored if metrics are already
/// initialized.
pub fn init_metrics_with_reader<R: MetricReader>(reader: R) {
    METRICS.get_or_init(|| {
        install_reader(reader);
        Metrics::new(&global::meter("tidemark"))
    });
}

fn install_reader<R: MetricReader>(reader: R) {
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

/// Get the global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Attribute identifying a hub on every recorded metric.
pub fn hub_attribute(name: &str) -> KeyValue {
    KeyValue::new("hub", Arc::<str>::from(name))
}

/// Record an advance that moved progress to `done_upto` and released `released` waiters.
pub fn record_advance(hub: &KeyValue, done_upto: u64, released: usize, waiting: usize) {
    if let Some(m) = METRICS.get() {
        let attrs = std::slice::from_ref(hub);
        m.advance_total.add(1, attrs);
        m.released_total.add(released as u64, attrs);
        m.done_upto.record(done_upto, attrs);
        m.waiting.record(waiting as u64, attrs);
    }
}

/// Record the current number of outstanding waiters.
pub fn record_waiting(hub: &KeyValue, waiting: usize) {
    if let Some(m) = METRICS.get() {
        m.waiting.record(waiting as u64, std::slice::from_ref(hub));
    }
}

/// Record how a wait resolved.
///
/// `latency_seconds` is only present for waits that were registered.
pub fn record_wait_outcome(hub: &KeyValue, outcome: &'static str, latency_seconds: Option<f64>) {
    if let Some(m) = METRICS.get() {
        let attrs = [hub.clone(), KeyValue::new("outcome", outcome)];
        m.wait_outcomes_total.add(1, &attrs);
        if let Some(latency) = latency_seconds {
            m.wait_latency.record(latency, &attrs);
        }
    }
}
