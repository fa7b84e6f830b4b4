//! Decision model: what the tracker does with an in-flight operation.
//!
//! # 純粋関数
//! `LifecyclePolicy::decide` は I/O をしない。pending オペレーション、
//! この発火の probe 結果、現在時刻から次のアクションを返すだけ。
//! スロットのクリア、watermark の書き込み、ログは tracker の仕事。
//!
//! ## 受領済みの結果は timeout より優先
//! Confirmed と Reverted はチェーンが結果を返したもの。timeout は
//! 「まだ結果がない」場合にだけ効く。Reverted は timeout 後に見えても
//! grace 期間（`submitted_at` から計測）の間は保持される。

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::operation::{OperationStatus, PendingOperation};
use super::state::Phase;

/// Default per-task timeout for an unconfirmed operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Default time a reverted handle is kept before the task may retry.
pub const DEFAULT_REVERTED_GRACE: Duration = Duration::from_secs(3600);

/// The next action for a task that owns an in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Still unconfirmed within the timeout; keep waiting.
    Wait,

    /// Confirmed; clear the slot and publish watermarks.
    Confirm,

    /// Reverted and still inside the grace period; keep the handle.
    HoldReverted,

    /// Reverted and the grace period has elapsed; clear the slot.
    ReleaseReverted,

    /// Unconfirmed past the timeout; stop waiting locally and clear.
    Abandon,

    /// The operation no longer exists; clear.
    Drop,
}

impl Decision {
    /// Phase the tracker rests in after applying this decision.
    pub fn phase_after(self) -> Phase {
        match self {
            Decision::Wait => Phase::AwaitingConfirmation,
            Decision::HoldReverted => Phase::Reverted,
            Decision::Confirm
            | Decision::ReleaseReverted
            | Decision::Abandon
            | Decision::Drop => Phase::Idle,
        }
    }

    pub fn clears_slot(self) -> bool {
        self.phase_after().is_idle()
    }
}

/// Timeout and grace settings of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub timeout: Duration,
    pub reverted_grace: Duration,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            reverted_grace: DEFAULT_REVERTED_GRACE,
        }
    }
}

impl LifecyclePolicy {
    pub fn new(timeout: Duration, reverted_grace: Duration) -> Self {
        Self {
            timeout,
            reverted_grace,
        }
    }

    /// Decide what to do with `op`.
    ///
    /// `status` is `None` when the operation was not probed this firing
    /// (already reverted) or the probe failed after the deadline.
    ///
    /// Rules, in order:
    /// 1. an already-reverted handle is held until the grace period elapses;
    /// 2. a confirmation always wins;
    /// 3. a revert starts the grace period, even when seen past the timeout
    ///    (the grace period is measured from `submitted_at` either way);
    /// 4. past the timeout, anything else abandons the operation;
    /// 5. otherwise follow the probe.
    pub fn decide(
        &self,
        op: &PendingOperation,
        status: Option<OperationStatus>,
        now: DateTime<Utc>,
    ) -> Decision {
        let elapsed = op.elapsed(now);

        if op.reverted {
            return self.reverted_decision(elapsed);
        }

        match status {
            Some(OperationStatus::Confirmed) => Decision::Confirm,
            Some(OperationStatus::Reverted) => self.reverted_decision(elapsed),
            _ if elapsed > self.timeout => Decision::Abandon,
            Some(OperationStatus::NotFound) => Decision::Drop,
            Some(OperationStatus::Unconfirmed) | None => Decision::Wait,
        }
    }

    /// Has `op` passed its timeout at `now`?
    pub fn is_overdue(&self, op: &PendingOperation, now: DateTime<Utc>) -> bool {
        op.elapsed(now) > self.timeout
    }

    fn reverted_decision(&self, elapsed: Duration) -> Decision {
        if elapsed > self.reverted_grace {
            Decision::ReleaseReverted
        } else {
            Decision::HoldReverted
        }
    }
}
