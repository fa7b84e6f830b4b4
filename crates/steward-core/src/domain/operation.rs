//! Operations: what a task submits and what the prober reports back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle returned by the submitter (a transaction hash on chain).
///
/// The core never interprets it; it is only passed back to the prober.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationHandle(String);

impl OperationHandle {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Status reported by the operation prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Known to the network, no receipt yet.
    Unconfirmed,

    /// Executed successfully.
    Confirmed,

    /// Executed, but the target logic rejected it.
    Reverted,

    /// The network no longer knows the operation (dropped, reorganized away).
    NotFound,
}

impl OperationStatus {
    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        !matches!(self, OperationStatus::Unconfirmed)
    }
}

/// The single in-flight operation a task may own.
///
/// Design:
/// - Created by the tracker right after a successful submit.
/// - `reverted` flips once the prober reported `Reverted`; from then on the
///   handle is kept only until the reverted grace period runs out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub handle: OperationHandle,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub reverted: bool,
}

impl PendingOperation {
    pub fn new(handle: OperationHandle, submitted_at: DateTime<Utc>) -> Self {
        Self {
            handle,
            submitted_at,
            reverted: false,
        }
    }

    /// Time since submission, clamped at zero if the clock went backwards.
    pub fn elapsed(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.submitted_at).to_std().unwrap_or_default()
    }

    pub fn mark_reverted(&mut self) {
        self.reverted = true;
    }
}
