//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all Quarry metrics
pub const METRICS_PREFIX: &str = "quarry";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 50ms, P99 < 250ms
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms - P50 target
    0.100,  // 100ms
    0.250,  // 250ms - P99 target
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Search metrics
    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of search queries"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end search latency in seconds"
    );

    describe_gauge!(
        format!("{}_search_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of results returned from search"
    );

    // Per-channel retrieval metrics
    describe_counter!(
        format!("{}_channel_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total retrieval channel executions"
    );

    describe_counter!(
        format!("{}_channel_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Retrieval channel failures and timeouts (degraded, not fatal)"
    );

    describe_histogram!(
        format!("{}_channel_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Retrieval channel latency in seconds"
    );

    // Rerank metrics
    describe_counter!(
        format!("{}_rerank_skipped_total", METRICS_PREFIX),
        Unit::Count,
        "Rerank passes skipped due to unavailability or timeout"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API errors"
    );

    // Index metrics
    describe_gauge!(
        format!("{}_indexed_chunks", METRICS_PREFIX),
        Unit::Count,
        "Chunks currently held in the store"
    );

    describe_gauge!(
        format!("{}_indexed_vectors", METRICS_PREFIX),
        Unit::Count,
        "Embeddings currently held in the vector index"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record search metrics
pub fn record_search(duration_secs: f64, result_count: usize) {
    counter!(format!("{}_search_queries_total", METRICS_PREFIX)).increment(1);

    histogram!(format!("{}_search_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    gauge!(format!("{}_search_results_count", METRICS_PREFIX)).set(result_count as f64);
}

/// Helper to record per-channel retrieval metrics
pub fn record_channel(channel: &str, duration_secs: f64, success: bool) {
    counter!(
        format!("{}_channel_requests_total", METRICS_PREFIX),
        "channel" => channel.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_channel_duration_seconds", METRICS_PREFIX),
        "channel" => channel.to_string()
    )
    .record(duration_secs);

    if !success {
        counter!(
            format!("{}_channel_failures_total", METRICS_PREFIX),
            "channel" => channel.to_string()
        )
        .increment(1);
    }
}

/// Helper to record a skipped rerank pass
pub fn record_rerank_skipped(reason: &str) {
    counter!(
        format!("{}_rerank_skipped_total", METRICS_PREFIX),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}
