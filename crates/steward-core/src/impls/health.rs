//! HealthSink implementations.

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::domain::Heartbeat;
use crate::ports::HealthSink;

/// Sink used when no metric is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHealthSink;

impl HealthSink for NoopHealthSink {
    fn report_heartbeat(&self, _heartbeat: Heartbeat) {}
}

/// Emits the heartbeat as a structured log event on the `steward::heartbeat`
/// target, for log-based alerting.
#[derive(Debug, Clone)]
pub struct TracingHealthSink {
    metric_name: String,
    namespace: String,
}

impl TracingHealthSink {
    pub fn new(metric_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            metric_name: metric_name.into(),
            namespace: namespace.into(),
        }
    }
}

impl HealthSink for TracingHealthSink {
    fn report_heartbeat(&self, heartbeat: Heartbeat) {
        info!(
            target: "steward::heartbeat",
            metric = %self.metric_name,
            namespace = %self.namespace,
            value = heartbeat.value(),
            "heartbeat"
        );
    }
}

/// Keeps every heartbeat in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingHealthSink {
    beats: Arc<Mutex<Vec<Heartbeat>>>,
}

impl RecordingHealthSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn beats(&self) -> Vec<Heartbeat> {
        self.beats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn degraded_count(&self) -> usize {
        self.beats()
            .iter()
            .filter(|b| **b == Heartbeat::Degraded)
            .count()
    }
}

impl HealthSink for RecordingHealthSink {
    fn report_heartbeat(&self, heartbeat: Heartbeat) {
        self.beats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(heartbeat);
    }
}
