//! Metrics instrumentation for classification.

use std::time::Instant;

pub fn record_classification_latency(duration_ms: f64) {
    metrics::histogram!("observer_classification_latency", duration_ms);
}

pub fn increment_heuristic_hits() {
    metrics::counter!("observer_heuristic_hits", 1);
}

pub fn increment_llm_calls() {
    metrics::counter!("observer_llm_calls", 1);
}

/// A semantic call failed or returned garbage and the safe reading was used.
pub fn increment_fallbacks() {
    metrics::counter!("observer_fallbacks", 1);
}

/// RAII timer for automatic metric recording.
pub struct MetricTimer {
    start: Instant,
}

impl MetricTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MetricTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MetricTimer {
    fn drop(&mut self) {
        record_classification_latency(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}
