//! HealthSink port - binary heartbeat metric.
//!
//! Fire-and-forget: implementations swallow their own failures. A sink that
//! is not configured (no credentials, no metric name) is a silent no-op.

use crate::domain::Heartbeat;

pub trait HealthSink: Send + Sync {
    fn report_heartbeat(&self, heartbeat: Heartbeat);
}
