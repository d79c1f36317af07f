//! Prometheus metrics and log-based metric events
//!
//! This module provides metrics tracking for:
//! - Fetch: upstream calls per source group, candidates found
//! - Publish: chain and social outcomes
//! - Broadcast: per-destination deliveries
//! - Iterations: completed and failed loop iterations
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.
//!
//! [`log_metric`] is independent of the registry: it writes a single JSON
//! line prefixed with `METRIC` that log pipelines can turn into alerts.

use prometheus::{
    register_counter_vec, register_histogram, CounterVec, Encoder, Histogram, TextEncoder,
};
use serde_json::{Map, Value};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all pipeline metrics
struct PipelineMetrics {
    fetch_calls: CounterVec,
    candidates: CounterVec,
    chain_publish: CounterVec,
    social_post: CounterVec,
    deliveries: CounterVec,
    iterations: CounterVec,
    iteration_duration: Histogram,
}

/// Global storage for pipeline metrics
static PIPELINE_METRICS: OnceLock<PipelineMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, errors are logged and subsequent
/// metric operations become no-ops.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = PipelineMetrics {
        fetch_calls: register_counter_vec!(
            "pollwire_fetch_calls_total",
            "Total upstream candidate-fetch calls by source group",
            &["source_group"]
        )?,
        candidates: register_counter_vec!(
            "pollwire_candidates_total",
            "Total winning candidates by source group",
            &["source_group"]
        )?,
        chain_publish: register_counter_vec!(
            "pollwire_chain_publish_total",
            "Chain publish attempts by result (ok, failed, maybe)",
            &["result"]
        )?,
        social_post: register_counter_vec!(
            "pollwire_social_post_total",
            "Social post attempts by status (ok, failed, skipped)",
            &["status"]
        )?,
        deliveries: register_counter_vec!(
            "pollwire_broadcast_deliveries_total",
            "Chat deliveries by destination class and result",
            &["class", "result"]
        )?,
        iterations: register_counter_vec!(
            "pollwire_iterations_total",
            "Pipeline iterations by result",
            &["result"]
        )?,
        iteration_duration: register_histogram!(
            "pollwire_iteration_duration_seconds",
            "Time spent in one pipeline iteration in seconds",
            vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0]
        )?,
    };

    PIPELINE_METRICS
        .set(metrics)
        .map_err(|_| "Pipeline metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    PIPELINE_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record one source group's fetch
pub fn record_fetch(source_group: &str, calls: usize, found_candidate: bool) {
    let Some(m) = PIPELINE_METRICS.get() else {
        return;
    };

    m.fetch_calls
        .with_label_values(&[source_group])
        .inc_by(calls as f64);
    if found_candidate {
        m.candidates.with_label_values(&[source_group]).inc();
    }
}

/// Record a chain publish outcome
pub fn record_chain_publish(success: bool, maybe_success: bool) {
    if let Some(m) = PIPELINE_METRICS.get() {
        let result = match (success, maybe_success) {
            (true, _) => "ok",
            (false, true) => "maybe",
            (false, false) => "failed",
        };
        m.chain_publish.with_label_values(&[result]).inc();
    }
}

/// Record a social post outcome (`ok`, `failed`, `skipped`)
pub fn record_social_post(status: &str) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.social_post.with_label_values(&[status]).inc();
    }
}

/// Record one chat delivery
pub fn record_delivery(class: &str, success: bool) {
    if let Some(m) = PIPELINE_METRICS.get() {
        let result = if success { "ok" } else { "failed" };
        m.deliveries.with_label_values(&[class, result]).inc();
    }
}

/// Record a finished iteration
pub fn record_iteration(success: bool, duration_secs: f64) {
    let Some(m) = PIPELINE_METRICS.get() else {
        return;
    };

    let result = if success { "ok" } else { "failed" };
    m.iterations.with_label_values(&[result]).inc();
    m.iteration_duration.observe(duration_secs);
}

// ============================================================================
// Log-based metrics
// ============================================================================

/// Build the JSON payload of a metric event
pub fn metric_payload(name: &str, fields: Value) -> Value {
    let mut payload = Map::new();
    payload.insert(
        "ts".to_string(),
        Value::String(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
    );
    payload.insert("metric".to_string(), Value::String(name.to_string()));
    if let Value::Object(extra) = fields {
        payload.extend(extra);
    }
    Value::Object(payload)
}

/// Emit a single-line JSON metric event (`METRIC {...}`)
pub fn log_metric(name: &str, fields: Value) {
    let payload = metric_payload(name, fields);
    tracing::info!(target: "pollwire::metric", "METRIC {payload}");
}

// ============================================================================
// Tests
// ============================================================================
