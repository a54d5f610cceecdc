//! Metrics instrumentation for session observability.

use std::time::Instant;

pub const MODEL_REQUEST_LATENCY: &str = "model_request_latency";
pub const TOOL_EXECUTION_LATENCY: &str = "tool_execution_latency";
pub const TURN_DURATION: &str = "turn_duration";

/// Record model request latency, from send until the reply is drained.
pub fn record_model_latency(duration_ms: f64) {
    metrics::histogram!(MODEL_REQUEST_LATENCY, duration_ms);
}

/// Record tool execution latency.
pub fn record_tool_latency(duration_ms: f64) {
    metrics::histogram!(TOOL_EXECUTION_LATENCY, duration_ms);
}

/// Record the duration of one full turn.
pub fn record_turn_duration(duration_ms: f64) {
    metrics::histogram!(TURN_DURATION, duration_ms);
}

/// Count messages evicted by the retention policy.
pub fn increment_context_evictions(count: u64) {
    metrics::counter!("context_evictions", count);
}

pub fn increment_tool_failures() {
    metrics::counter!("tool_failures", 1);
}

pub fn increment_max_iterations_exceeded() {
    metrics::counter!("max_iterations_exceeded", 1);
}

/// RAII timer for automatic metric recording.
pub struct MetricTimer {
    start: Instant,
    metric_name: &'static str,
}

impl MetricTimer {
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }
}

impl Drop for MetricTimer {
    fn drop(&mut self) {
        let duration_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        match self.metric_name {
            MODEL_REQUEST_LATENCY => record_model_latency(duration_ms),
            TOOL_EXECUTION_LATENCY => record_tool_latency(duration_ms),
            TURN_DURATION => record_turn_duration(duration_ms),
            _ => {}
        }
    }
}
