use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, CounterVec, Encoder, HistogramVec, IntCounterVec, IntGauge,
    IntGaugeVec, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Study backend (upstream) Metrics
    pub static ref BACKEND_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "backend_requests_total",
        "Total number of requests sent to the study backend",
        &["endpoint", "status"]
    )
    .unwrap();

    pub static ref BACKEND_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "backend_request_duration_seconds",
        "Study backend request duration in seconds",
        &["endpoint"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 45.0]
    )
    .unwrap();

    // Retry/poll controller Metrics
    pub static ref OPERATIONS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "operations_submitted_total",
        "Total number of hint/chat operations submitted",
        &["kind"]
    )
    .unwrap();

    pub static ref OPERATION_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "operation_attempts_total",
        "Direct attempts made by controllers",
        &["kind", "outcome"]
    )
    .unwrap();

    pub static ref OPERATION_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "operation_transitions_total",
        "Phase transitions observed by controllers",
        &["kind", "phase"]
    )
    .unwrap();

    pub static ref POLL_PROBES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "poll_probes_total",
        "Polling probes issued after retries were exhausted",
        &["kind", "result"]
    )
    .unwrap();

    pub static ref STALE_RESULTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "stale_results_total",
        "Results discarded because a newer submission superseded them",
        &["kind"]
    )
    .unwrap();

    pub static ref ACTIVE_CONTROLLERS: IntGaugeVec = register_int_gauge_vec!(
        "active_controllers",
        "Controllers currently tracked by the registry",
        &["kind"]
    )
    .unwrap();

    pub static ref SSE_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "sse_connections_active",
        "Number of active SSE connections"
    )
    .unwrap();

    // Mastery Metrics
    pub static ref MASTERY_AGGREGATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "mastery_aggregations_total",
        "Mastery aggregations served",
        &["result"]
    )
    .unwrap();

    // Session cache Metrics
    pub static ref SESSION_CACHE_LOOKUPS: CounterVec = register_counter_vec!(
        "session_cache_lookups",
        "Session registration cache hit/miss count",
        &["result"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

pub fn record_session_cache_hit() {
    SESSION_CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
}

pub fn record_session_cache_miss() {
    SESSION_CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
}
