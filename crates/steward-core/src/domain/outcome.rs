//! Firing outcome: the common result format of one firing.
//!
//! Every firing ends in exactly one `FiringOutcome` (or a `StewardError`).
//! The supervisor logs it and derives the heartbeat from it, so the mapping
//! to [`Heartbeat`] lives here next to the variants.

use serde::{Deserialize, Serialize};

use super::ids::Identity;
use super::operation::OperationHandle;

/// Binary health signal reported once per firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Heartbeat {
    Healthy,
    Degraded,
}

impl Heartbeat {
    /// Metric value: 1 = healthy pass, 0 = degraded/error.
    pub fn value(self) -> u8 {
        match self {
            Heartbeat::Healthy => 1,
            Heartbeat::Degraded => 0,
        }
    }
}

/// Why an idle firing did not submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The domain predicate said "not now".
    PredicateFalse,

    /// The upstream watermark is absent, zero, or not above ours.
    AwaitingUpstream {
        upstream_key: String,
        upstream: Option<u64>,
        watermark: u64,
    },
}

/// What one firing did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FiringOutcome {
    /// Idle, nothing to do this firing.
    Skipped(SkipReason),

    /// A new operation was submitted and is now tracked.
    Submitted { handle: OperationHandle },

    /// The identity's outstanding-operation ceiling was reached.
    QueueFull {
        identity: Identity,
        outstanding: u64,
        ceiling: u64,
    },

    /// Still unconfirmed and within the timeout.
    Pending {
        handle: OperationHandle,
        elapsed_secs: u64,
    },

    Confirmed { handle: OperationHandle },

    /// Reverted on chain. `cleared` is true once the grace period has elapsed
    /// and the slot was freed.
    Reverted {
        handle: OperationHandle,
        cleared: bool,
    },

    /// Unconfirmed past the task timeout; abandoned locally.
    TimedOut {
        handle: OperationHandle,
        elapsed_secs: u64,
    },

    /// The prober no longer knows the operation.
    Dropped { handle: OperationHandle },

    /// Watchdog pass: the chain advanced to `height`.
    ChainAdvanced { previous: Option<u64>, height: u64 },
}

impl FiringOutcome {
    pub fn health(&self) -> Heartbeat {
        match self {
            FiringOutcome::Skipped(_)
            | FiringOutcome::Submitted { .. }
            | FiringOutcome::Pending { .. }
            | FiringOutcome::Confirmed { .. }
            | FiringOutcome::ChainAdvanced { .. } => Heartbeat::Healthy,
            FiringOutcome::QueueFull { .. }
            | FiringOutcome::Reverted { .. }
            | FiringOutcome::TimedOut { .. }
            | FiringOutcome::Dropped { .. } => Heartbeat::Degraded,
        }
    }

    /// Did this firing change tracked state (slot or watermarks)?
    pub fn changes_state(&self) -> bool {
        matches!(
            self,
            FiringOutcome::Submitted { .. }
                | FiringOutcome::Confirmed { .. }
                | FiringOutcome::Reverted { .. }
                | FiringOutcome::TimedOut { .. }
                | FiringOutcome::Dropped { .. }
        )
    }

    /// Short label used as a structured log field.
    pub fn label(&self) -> &'static str {
        match self {
            FiringOutcome::Skipped(SkipReason::PredicateFalse) => "skipped",
            FiringOutcome::Skipped(SkipReason::AwaitingUpstream { .. }) => "awaiting_upstream",
            FiringOutcome::Submitted { .. } => "submitted",
            FiringOutcome::QueueFull { .. } => "queue_full",
            FiringOutcome::Pending { .. } => "pending",
            FiringOutcome::Confirmed { .. } => "confirmed",
            FiringOutcome::Reverted { .. } => "reverted",
            FiringOutcome::TimedOut { .. } => "timed_out",
            FiringOutcome::Dropped { .. } => "dropped",
            FiringOutcome::ChainAdvanced { .. } => "chain_advanced",
        }
    }
}
