//! Domain model (names, operations, decisions, outcomes, errors).
//!
//! Nothing in here performs I/O; collaborators live in `ports`, wiring in `app`.

pub mod decision;
pub mod errors;
pub mod ids;
pub mod operation;
pub mod outcome;
pub mod state;

pub use decision::{DEFAULT_REVERTED_GRACE, DEFAULT_TIMEOUT, Decision, LifecyclePolicy};
pub use errors::{ErrorKind, StewardError};
pub use ids::{FiringId, Identity, RunId, TaskName};
pub use operation::{OperationHandle, OperationStatus, PendingOperation};
pub use outcome::{FiringOutcome, Heartbeat, SkipReason};
pub use state::Phase;
