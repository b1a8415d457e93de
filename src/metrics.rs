//! Prometheus metrics for query orchestration
//!
//! Counters for requests, cache activity, and backend computes, plus a
//! request latency histogram. Recording is a no-op in effect when nothing
//! scrapes the default registry.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    // === Requests ===

    /// Total query requests
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "analytics_requests_total",
        "Total query requests by visualization and status",
        &["visualization", "status"]
    ).unwrap();

    /// Request duration
    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "analytics_request_duration_seconds",
        "Query request latency in seconds",
        &["visualization"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    // === Cache ===

    /// Cache lookups resolved per window
    pub static ref CACHE_RESULTS: CounterVec = register_counter_vec!(
        "analytics_cache_results_total",
        "Whole-unit window cache hits and misses",
        &["visualization", "result"]
    ).unwrap();

    /// Cache operations downgraded after a store failure
    pub static ref CACHE_DEGRADED: CounterVec = register_counter_vec!(
        "analytics_cache_degraded_total",
        "Cache operations that failed and were treated as misses",
        &["operation"]
    ).unwrap();

    // === Backend ===

    /// Backend compute calls
    pub static ref COMPUTES_TOTAL: CounterVec = register_counter_vec!(
        "analytics_computes_total",
        "Backend compute calls by visualization and window kind",
        &["visualization", "window"]
    ).unwrap();

    /// Registered visualizations
    pub static ref VISUALIZATIONS: Gauge = register_gauge!(
        "analytics_visualizations",
        "Number of registered visualizations"
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record a completed request
#[inline]
pub fn record_request(visualization: &str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    REQUESTS_TOTAL
        .with_label_values(&[visualization, status])
        .inc();

    REQUEST_DURATION
        .with_label_values(&[visualization])
        .observe(duration_secs);
}

/// Record a whole-unit window resolved from or missing in the cache
#[inline]
pub fn record_cache_result(visualization: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    CACHE_RESULTS
        .with_label_values(&[visualization, result])
        .inc();
}

/// Record a cache failure that was downgraded
#[inline]
pub fn record_cache_degraded(operation: &str) {
    CACHE_DEGRADED.with_label_values(&[operation]).inc();
}

/// Record a backend compute call
#[inline]
pub fn record_compute(visualization: &str, window_kind: &str) {
    COMPUTES_TOTAL
        .with_label_values(&[visualization, window_kind])
        .inc();
}

/// Update the registered visualization count
#[inline]
pub fn update_visualizations(count: usize) {
    VISUALIZATIONS.set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request() {
        record_request("metrics-test", 0.02, true);
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("analytics_requests_total"));
        assert!(metrics.contains("metrics-test"));
    }

    #[test]
    fn test_cache_and_compute_counters() {
        record_cache_result("metrics-cache-test", false);
        record_cache_degraded("lookup");
        record_compute("metrics-cache-test", "partial");

        let misses = CACHE_RESULTS
            .with_label_values(&["metrics-cache-test", "miss"])
            .get();
        assert!(misses >= 1.0);

        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("analytics_computes_total"));
        assert!(metrics.contains("analytics_cache_degraded_total"));
    }
}
