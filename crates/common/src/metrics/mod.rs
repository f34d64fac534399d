//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram,
    gauge, histogram, Unit,
};

/// Metrics prefix for all BioSearch metrics
pub const METRICS_PREFIX: &str = "biosearch";

/// Histogram buckets for end-to-end RAG latency (in seconds).
/// Embedding plus vector search should stay under 250ms; generation dominates the tail.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms - retrieval target
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Buckets for embedding latency (typically slower)
pub const EMBEDDING_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    5.000,  // 5s
    30.00,  // 30s
];

/// Full metric name for a suffix
pub fn metric_name(suffix: &str) -> String {
    format!("{}_{}", METRICS_PREFIX, suffix)
}

/// Register all metric descriptions
pub fn register_metrics() {
    // RAG metrics
    describe_counter!(
        metric_name("rag_queries_total"),
        Unit::Count,
        "Total number of RAG queries"
    );

    describe_histogram!(
        metric_name("rag_duration_seconds"),
        Unit::Seconds,
        "RAG query latency in seconds"
    );

    describe_gauge!(
        metric_name("rag_results_count"),
        Unit::Count,
        "Number of results returned by the last RAG query"
    );

    // Embedding metrics
    describe_counter!(
        metric_name("embedding_requests_total"),
        Unit::Count,
        "Total embedding requests"
    );

    describe_histogram!(
        metric_name("embedding_duration_seconds"),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        metric_name("embedding_errors_total"),
        Unit::Count,
        "Total embedding errors"
    );

    // Answer generation metrics
    describe_counter!(
        metric_name("answers_generated_total"),
        Unit::Count,
        "Total answers produced, by generator and status"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record RAG query metrics
pub fn record_rag(duration_secs: f64, result_count: usize, generated: bool) {
    let generated = if generated { "true" } else { "false" };

    counter!(
        metric_name("rag_queries_total"),
        "generate" => generated
    )
    .increment(1);

    histogram!(
        metric_name("rag_duration_seconds"),
        "generate" => generated
    )
    .record(duration_secs);

    gauge!(metric_name("rag_results_count")).set(result_count as f64);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        metric_name("embedding_requests_total"),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            metric_name("embedding_duration_seconds"),
            "model" => model.to_string()
        )
        .record(duration_secs);

        tracing::trace!(model, batch_size, duration_secs, "Embedding recorded");
    } else {
        counter!(
            metric_name("embedding_errors_total"),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to record answer generation metrics
pub fn record_generation(generator: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        metric_name("answers_generated_total"),
        "generator" => generator.to_string(),
        "status" => status
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [LATENCY_BUCKETS, EMBEDDING_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }

        // Retrieval target should be a bucket boundary
        assert!(LATENCY_BUCKETS.contains(&0.250));
    }

    #[test]
    fn test_metric_name() {
        assert_eq!(metric_name("rag_queries_total"), "biosearch_rag_queries_total");
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: calls are no-ops and must not panic
        record_rag(0.12, 3, false);
        record_embedding(0.01, "feature-hash", 1, true);
        record_embedding(0.01, "feature-hash", 1, false);
        record_generation("context-echo", true);
    }
}
