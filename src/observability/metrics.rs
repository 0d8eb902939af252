//! OpenTelemetry metrics.
//!
//! Key metrics:
//! - tamdb_query_total: Counter for Query calls, by database and outcome
//! - tamdb_query_latency_seconds: Histogram for Query latency
//! - tamdb_submit_total: Counter for merged samples, by database and outcome
//! - tamdb_accept_errors_total: Counter for failed accepts

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Outcome label of a call or submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    /// Failed inside a transaction that was rolled back
    RolledBack,
    /// Refused before touching storage (validation, read-only, closed)
    Rejected,
    Error,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::RolledBack => "rolled_back",
            Outcome::Rejected => "rejected",
            Outcome::Error => "error",
        }
    }
}

/// TamDB metrics registry.
#[derive(Debug)]
pub struct Metrics {
    pub query_total: Counter<u64>,
    pub query_latency: Histogram<f64>,
    pub submit_total: Counter<u64>,
    pub accept_errors: Counter<u64>,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            query_total: meter
                .u64_counter("tamdb_query_total")
                .with_description("Total number of Query calls")
                .with_unit("1")
                .init(),
            query_latency: meter
                .f64_histogram("tamdb_query_latency_seconds")
                .with_description("Query latency from request to reply")
                .with_unit("s")
                .init(),
            submit_total: meter
                .u64_counter("tamdb_submit_total")
                .with_description("Total number of submitted samples")
                .with_unit("1")
                .init(),
            accept_errors: meter
                .u64_counter("tamdb_accept_errors_total")
                .with_description("Connections that failed to be accepted")
                .with_unit("1")
                .init(),
        }
    }
}

/// Initialize the metrics system.
///
/// Metrics are recorded into an in-process reader. Call once at startup;
/// later calls are ignored.
pub fn init_metrics() {
    METRICS.get_or_init(|| {
        let reader = ManualReader::builder().build();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();
        global::set_meter_provider(provider);

        let meter = global::meter("tamdb");
        Metrics::new(&meter)
    });
}

/// The global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Record one Query call.
pub fn record_query(database: &str, outcome: Outcome, latency_seconds: f64) {
    if let Some(m) = METRICS.get() {
        let attrs = [
            KeyValue::new("database", database.to_string()),
            KeyValue::new("outcome", outcome.as_str()),
        ];
        m.query_total.add(1, &attrs);
        m.query_latency.record(latency_seconds, &attrs);
    }
}

/// Record one submitted sample.
pub fn record_submit(database: &str, outcome: Outcome) {
    if let Some(m) = METRICS.get() {
        let attrs = [
            KeyValue::new("database", database.to_string()),
            KeyValue::new("outcome", outcome.as_str()),
        ];
        m.submit_total.add(1, &attrs);
    }
}

/// Record a failed accept.
pub fn record_accept_error() {
    if let Some(m) = METRICS.get() {
        m.accept_errors.add(1, &[]);
    }
}
