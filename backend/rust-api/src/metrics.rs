use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, register_int_counter_vec,
    CounterVec, Encoder, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
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

    // Store Metrics
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "store_operations_total",
        "Total number of session store operations",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref STORE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "store_operation_duration_seconds",
        "Session store operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Catalog cache Metrics
    pub static ref CACHE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "catalog_cache_operations_total",
        "Total number of catalog cache operations",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref CACHE_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "catalog_cache_lookups_total",
        "Catalog cache lookups by result",
        &["result"]
    )
    .unwrap();

    // Engine Metrics
    pub static ref SESSIONS_STARTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ce_sessions_started_total",
        "Sessions started, by CE eligibility",
        &["ce_eligible"]
    )
    .unwrap();

    pub static ref HEARTBEATS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ce_heartbeats_total",
        "Heartbeats by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref CREDITED_SECONDS_TOTAL: CounterVec = register_counter_vec!(
        "ce_credited_seconds_total",
        "Seconds credited by accepted heartbeats",
        &["kind"]
    )
    .unwrap();

    pub static ref HEARTBEAT_EVENTS_TOTAL: IntCounter = register_int_counter!(
        "ce_heartbeat_events_total",
        "Activity events appended through heartbeats"
    )
    .unwrap();

    pub static ref COMPLETIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ce_completions_total",
        "Completion requests by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref CERTIFICATE_COLLISIONS_TOTAL: IntCounter = register_int_counter!(
        "ce_certificate_number_collisions_total",
        "Certificate numbers regenerated after a uniqueness collision"
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

/// Helper: track session store operation with metrics
pub async fn track_store_operation<F, T>(operation: &str, future: F) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    STORE_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    STORE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration);

    result
}

/// Helper: track catalog cache operation with metrics
pub async fn track_cache_operation<F, T>(operation: &str, future: F) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let result = future.await;
    let status = if result.is_ok() { "success" } else { "error" };

    CACHE_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    result
}

pub fn record_cache_hit() {
    CACHE_LOOKUPS_TOTAL.with_label_values(&["hit"]).inc();
}

pub fn record_cache_miss() {
    CACHE_LOOKUPS_TOTAL.with_label_values(&["miss"]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_metrics_are_registered() {
        let _ = HEARTBEATS_TOTAL.with_label_values(&["accepted"]).get();
        let _ = COMPLETIONS_TOTAL.with_label_values(&["issued"]).get();
        let _ = CERTIFICATE_COLLISIONS_TOTAL.get();
    }

    #[test]
    fn render_includes_heartbeat_series() {
        HEARTBEATS_TOTAL.with_label_values(&["rate_limited"]).inc();

        let output = render_metrics().expect("metrics render");
        assert!(output.contains("ce_heartbeats_total"));
    }

    #[tokio::test]
    async fn store_operation_failures_are_counted() {
        let before = STORE_OPERATIONS_TOTAL
            .with_label_values(&["unit_test_op", "error"])
            .get();
        let result: Result<(), _> =
            track_store_operation("unit_test_op", async { Err(anyhow::anyhow!("boom")) }).await;
        assert!(result.is_err());
        assert_eq!(
            STORE_OPERATIONS_TOTAL
                .with_label_values(&["unit_test_op", "error"])
                .get(),
            before + 1
        );
    }
}
