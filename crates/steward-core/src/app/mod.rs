//! App - the scheduler itself, wired from ports.
//!
//! # Components
//! - **SchedulerBuilder**: registration and fail-fast validation
//! - **Supervisor**: per-task interval loops, isolation, heartbeat, shutdown
//! - **TaskTracker**: single-flight slot and lifecycle decisions
//! - **SubmissionGate**: per-identity outstanding-operation ceiling
//! - **CoordinationStore**: watermarks that order dependent tasks
//! - **Snapshot / Status**: durable state and operator views

pub mod builder;
pub mod coordination;
pub mod gate;
pub mod shutdown;
pub mod snapshot;
pub mod status;
pub mod supervisor;
pub mod task;
pub mod tracker;

pub use self::builder::{BuildError, SchedulerBuilder};
pub use self::coordination::{CoordinationStore, GateCheck, WatermarkGate};
pub use self::gate::{DEFAULT_CEILING, GateDecision, GatePermit, SubmissionGate};
pub use self::shutdown::{ShutdownReason, ShutdownSignal};
pub use self::snapshot::{PersistedOperation, Snapshot, SnapshotFile};
pub use self::status::{StatusBoard, StatusView};
pub use self::supervisor::{Scheduler, SchedulerHandle};
pub use self::task::{FiringEnv, OperationTask, TaskSpec, WATCHDOG_TASK, Watchdog};
pub use self::tracker::TaskTracker;
