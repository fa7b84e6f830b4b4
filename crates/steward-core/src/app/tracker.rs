//! TaskTracker - 1 タスクの single-flight スロット
//!
//! # 責務
//! - 送信済みで未確定のオペレーションを最大 1 つだけ保持する
//! - スロットが埋まっている間、そのタスクは新しい送信をしない
//!
//! # 状態遷移
//! ```text
//! Idle --submit--> AwaitingConfirmation --Reverted--> Reverted
//!  ^                    |                               |
//!  +--Confirmed/NotFound/timeout------------------------+ (grace 経過)
//! ```
//!
//! ## decide と apply を分ける理由
//! tracker 自身は I/O をしない。呼び出し側が probe し、
//! [`TaskTracker::decide`] で結果の意味を聞き、[`TaskTracker::apply`] で
//! スロットに反映する。Confirm の場合は、その間に watermark を書き込む。
//! 書き込みが失敗したらスロットは残り、次の発火で再確認される。

use chrono::{DateTime, Utc};

use crate::domain::{
    Decision, FiringOutcome, LifecyclePolicy, OperationHandle, OperationStatus, PendingOperation,
    Phase,
};

#[derive(Debug, Clone)]
pub struct TaskTracker {
    policy: LifecyclePolicy,
    pending: Option<PendingOperation>,
}

impl TaskTracker {
    pub fn new(policy: LifecyclePolicy) -> Self {
        Self {
            policy,
            pending: None,
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    pub fn pending(&self) -> Option<&PendingOperation> {
        self.pending.as_ref()
    }

    pub fn phase(&self) -> Phase {
        Phase::of(self.pending.as_ref())
    }

    /// Put back an operation restored from a snapshot.
    pub fn restore(&mut self, pending: Option<PendingOperation>) {
        self.pending = pending;
    }

    /// この発火で probe が必要か
    ///
    /// Reverted のハンドルは grace 期間が過ぎるまで保持するだけで、再 probe しない。
    pub fn needs_probe(&self) -> bool {
        matches!(&self.pending, Some(op) if !op.reverted)
    }

    /// Has the pending operation passed its timeout?
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|op| self.policy.is_overdue(op, now))
    }

    /// What the probe result means for the pending operation.
    ///
    /// Returns `None` when the tracker is idle.
    pub fn decide(&self, status: Option<OperationStatus>, now: DateTime<Utc>) -> Option<Decision> {
        self.pending
            .as_ref()
            .map(|op| self.policy.decide(op, status, now))
    }

    /// Apply `decision` to the slot and describe what happened.
    ///
    /// Must follow a [`TaskTracker::decide`] on a non-idle tracker.
    pub fn apply(&mut self, decision: Decision, now: DateTime<Utc>) -> Option<FiringOutcome> {
        let op = self.pending.as_mut()?;
        let handle = op.handle.clone();
        let elapsed_secs = op.elapsed(now).as_secs();

        let outcome = match decision {
            Decision::Wait => FiringOutcome::Pending {
                handle,
                elapsed_secs,
            },
            Decision::Confirm => FiringOutcome::Confirmed { handle },
            Decision::HoldReverted => {
                op.mark_reverted();
                FiringOutcome::Reverted {
                    handle,
                    cleared: false,
                }
            }
            Decision::ReleaseReverted => FiringOutcome::Reverted {
                handle,
                cleared: true,
            },
            Decision::Abandon => FiringOutcome::TimedOut {
                handle,
                elapsed_secs,
            },
            Decision::Drop => FiringOutcome::Dropped { handle },
        };

        if decision.clears_slot() {
            self.pending = None;
        }
        Some(outcome)
    }

    /// Track a freshly submitted operation.
    pub fn record_submission(&mut self, handle: OperationHandle, now: DateTime<Utc>) {
        self.pending = Some(PendingOperation::new(handle, now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + chrono::Duration::seconds(secs)
    }

    fn tracker_with_pending() -> TaskTracker {
        let mut tracker = TaskTracker::new(LifecyclePolicy::new(
            Duration::from_secs(180),
            Duration::from_secs(3600),
        ));
        tracker.record_submission(OperationHandle::new("0xh1"), t0());
        tracker
    }

    #[test]
    fn idle_tracker_has_nothing_to_decide() {
        let tracker = TaskTracker::new(LifecyclePolicy::default());
        assert_eq!(tracker.phase(), Phase::Idle);
        assert!(!tracker.needs_probe());
        assert_eq!(tracker.decide(Some(OperationStatus::Confirmed), t0()), None);
    }

    #[rstest]
    #[case::still_pending(OperationStatus::Unconfirmed, 60, Phase::AwaitingConfirmation, "pending")]
    #[case::confirmed(OperationStatus::Confirmed, 60, Phase::Idle, "confirmed")]
    #[case::dropped(OperationStatus::NotFound, 60, Phase::Idle, "dropped")]
    #[case::reverted(OperationStatus::Reverted, 60, Phase::Reverted, "reverted")]
    #[case::timed_out(OperationStatus::Unconfirmed, 240, Phase::Idle, "timed_out")]
    fn probe_result_moves_the_slot(
        #[case] status: OperationStatus,
        #[case] secs: i64,
        #[case] phase: Phase,
        #[case] label: &str,
    ) {
        let mut tracker = tracker_with_pending();
        let decision = tracker.decide(Some(status), at(secs)).unwrap();
        let outcome = tracker.apply(decision, at(secs)).unwrap();

        assert_eq!(tracker.phase(), phase);
        assert_eq!(outcome.label(), label);
    }

    #[test]
    fn reverted_handle_is_not_probed_and_released_after_grace() {
        let mut tracker = tracker_with_pending();
        let decision = tracker.decide(Some(OperationStatus::Reverted), at(30)).unwrap();
        tracker.apply(decision, at(30));
        assert!(!tracker.needs_probe());

        let decision = tracker.decide(None, at(1800)).unwrap();
        assert_eq!(decision, Decision::HoldReverted);
        tracker.apply(decision, at(1800));
        assert_eq!(tracker.phase(), Phase::Reverted);

        let decision = tracker.decide(None, at(3601)).unwrap();
        let outcome = tracker.apply(decision, at(3601)).unwrap();
        assert_eq!(
            outcome,
            FiringOutcome::Reverted {
                handle: OperationHandle::new("0xh1"),
                cleared: true
            }
        );
        assert_eq!(tracker.phase(), Phase::Idle);
    }

    #[test]
    fn overdue_only_after_timeout() {
        let tracker = tracker_with_pending();
        assert!(!tracker.is_overdue(at(180)));
        assert!(tracker.is_overdue(at(181)));
    }
}
