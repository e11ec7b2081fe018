//! Prometheus metrics for dues-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, register_int_counter_vec,
    CounterVec, Encoder, Histogram, HistogramVec, IntCounterVec, TextEncoder,
};

/// Counter for HTTP requests by route template.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "dues_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("Failed to register HTTP_REQUESTS_TOTAL")
});

/// Histogram for HTTP request duration by route template.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "dues_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path", "status"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register HTTP_REQUEST_DURATION")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "dues_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for ledger operations by outcome.
pub static LEDGER_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dues_ledger_operations_total",
        "Total number of ledger operations",
        &["operation", "status"]
    )
    .expect("Failed to register LEDGER_OPERATIONS")
});

/// Counter for assessment results per member.
pub static ASSIGNED_DUES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dues_assigned_dues_total",
        "Assessment outcomes per target member",
        &["outcome"]
    )
    .expect("Failed to register ASSIGNED_DUES")
});

/// Counter for payments by method.
pub static PAYMENTS_RECORDED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dues_payments_recorded_total",
        "Total number of payments recorded",
        &["method"]
    )
    .expect("Failed to register PAYMENTS_RECORDED")
});

/// Counter for status synchronizer runs.
pub static STATUS_SYNCS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dues_status_syncs_total",
        "Status synchronizer runs by result",
        &["result"]
    )
    .expect("Failed to register STATUS_SYNCS")
});

/// Histogram for full reconciliation sweeps.
pub static SWEEP_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "dues_reconcile_sweep_duration_seconds",
        "Duration of a full status reconciliation sweep",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]
    )
    .expect("Failed to register SWEEP_DURATION")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dues_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&LEDGER_OPERATIONS);
    Lazy::force(&ASSIGNED_DUES);
    Lazy::force(&PAYMENTS_RECORDED);
    Lazy::force(&STATUS_SYNCS);
    Lazy::force(&SWEEP_DURATION);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_http_request(method: &str, path: &str, status: &str, seconds: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, status])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[method, path, status])
        .observe(seconds);
}

pub fn record_ledger_operation(operation: &str, status: &str) {
    LEDGER_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

pub fn record_assigned_due(outcome: &str) {
    ASSIGNED_DUES.with_label_values(&[outcome]).inc();
}

pub fn record_payment(method: &str) {
    PAYMENTS_RECORDED.with_label_values(&[method]).inc();
}

pub fn record_status_sync(result: &str) {
    STATUS_SYNCS.with_label_values(&[result]).inc();
}

pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
