//! Impls - in-process implementations of the ports.
//!
//! - **SimulatedChain** / **ScriptedAction**: in-memory chain for tests and
//!   the CLI's dry-run mode.
//! - **Health sinks**: no-op, log-based and recording heartbeats.
//!
//! Real RPC-backed collaborators belong to the embedding application.

pub mod health;
pub mod simulated;

pub use self::health::{NoopHealthSink, RecordingHealthSink, TracingHealthSink};
pub use self::simulated::{ScriptedAction, SimulatedChain};
