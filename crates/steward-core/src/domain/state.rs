//! Tracker phase: the observable state of a task's lifecycle tracker.

use serde::{Deserialize, Serialize};

use super::operation::PendingOperation;

/// Phase of a task's lifecycle tracker.
///
/// State transitions (one per firing):
/// - Idle -> AwaitingConfirmation (submitted)
/// - AwaitingConfirmation -> Idle (confirmed / not found / timed out)
/// - AwaitingConfirmation -> Reverted (reverted within grace)
/// - Reverted -> Idle (grace elapsed)
///
/// Confirmed, TimedOut and NotFound are transitions, not resting states:
/// the slot is cleared in the same firing that observes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    AwaitingConfirmation,
    Reverted,
}

impl Phase {
    pub fn of(pending: Option<&PendingOperation>) -> Self {
        match pending {
            None => Phase::Idle,
            Some(op) if op.reverted => Phase::Reverted,
            Some(_) => Phase::AwaitingConfirmation,
        }
    }

    /// May the predicate be evaluated in this phase?
    pub fn is_idle(self) -> bool {
        matches!(self, Phase::Idle)
    }
}
