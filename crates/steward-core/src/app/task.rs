//! Task firings: what one tick of a registered task does.
//!
//! # OperationTask
//! Every firing starts with the tracker guard:
//! 1. an in-flight operation is probed (or, once reverted, only aged) and the
//!    firing returns, whatever the probe said;
//! 2. an idle task checks its watermark gate, evaluates its predicate, takes
//!    its identity's submission gate and submits.
//!
//! Probe and submit never happen in the same firing, so a slow probe cannot
//! overlap a fresh submission decision.
//!
//! # Watchdog
//! Compares the chain height with the one seen on its previous firing. No
//! progress is the one fatal error of the scheduler.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::app::coordination::{CoordinationStore, GateCheck, WatermarkGate};
use crate::app::gate::{GateDecision, SubmissionGate};
use crate::app::tracker::TaskTracker;
use crate::domain::{
    DEFAULT_TIMEOUT, Decision, FiringId, FiringOutcome, Identity, LifecyclePolicy,
    PendingOperation, SkipReason, StewardError, TaskName,
};
use crate::ports::{ChainHeight, Clock, FiringContext, OperationProber, TaskAction, TaskParams};

/// Registration record of one operation task.
#[derive(Clone)]
pub struct TaskSpec {
    pub name: TaskName,
    pub interval: Duration,
    pub timeout: Duration,
    pub identity: Identity,
    pub params: TaskParams,
    /// Key set to the current height when this task's operation confirms.
    pub publishes: Option<String>,
    /// Upstream watermark this task waits for.
    pub after: Option<WatermarkGate>,
    pub action: Arc<dyn TaskAction>,
}

impl TaskSpec {
    pub fn new(name: impl Into<TaskName>, interval: Duration, action: Arc<dyn TaskAction>) -> Self {
        Self {
            name: name.into(),
            interval,
            timeout: DEFAULT_TIMEOUT,
            identity: Identity::default(),
            params: TaskParams::default(),
            publishes: None,
            after: None,
            action,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn params(mut self, params: TaskParams) -> Self {
        self.params = params;
        self
    }

    pub fn publishes(mut self, key: impl Into<String>) -> Self {
        self.publishes = Some(key.into());
        self
    }

    pub fn after(mut self, gate: WatermarkGate) -> Self {
        self.after = Some(gate);
        self
    }

    /// Coordination keys this task writes.
    pub fn written_keys(&self) -> impl Iterator<Item = &str> {
        self.publishes
            .as_deref()
            .into_iter()
            .chain(self.after.as_ref().map(|g| g.watermark_key.as_str()))
    }
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("identity", &self.identity)
            .field("publishes", &self.publishes)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}

/// Collaborators shared by every firing.
#[derive(Clone)]
pub struct FiringEnv {
    pub prober: Arc<dyn OperationProber>,
    pub chain: Arc<dyn ChainHeight>,
    pub gate: Arc<SubmissionGate>,
    pub store: CoordinationStore,
    pub clock: Arc<dyn Clock>,
}

pub struct OperationTask {
    spec: TaskSpec,
    tracker: TaskTracker,
}

impl OperationTask {
    pub fn new(spec: TaskSpec, reverted_grace: Duration) -> Self {
        let policy = LifecyclePolicy::new(spec.timeout, reverted_grace);
        Self {
            spec,
            tracker: TaskTracker::new(policy),
        }
    }

    pub fn name(&self) -> &TaskName {
        &self.spec.name
    }

    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    pub fn pending(&self) -> Option<&PendingOperation> {
        self.tracker.pending()
    }

    pub fn restore(&mut self, pending: Option<PendingOperation>) {
        self.tracker.restore(pending);
    }

    /// Run one firing.
    pub async fn fire(
        &mut self,
        env: &FiringEnv,
        firing_id: FiringId,
    ) -> Result<FiringOutcome, StewardError> {
        let now = env.clock.now();

        if let Some(outcome) = self.settle_pending(env, now).await? {
            return Ok(outcome);
        }

        if let Some(gate) = &self.spec.after {
            if let GateCheck::Closed {
                upstream,
                watermark,
            } = gate.check(&env.store)
            {
                return Ok(FiringOutcome::Skipped(SkipReason::AwaitingUpstream {
                    upstream_key: gate.upstream_key.clone(),
                    upstream,
                    watermark,
                }));
            }
        }

        let ctx = FiringContext {
            task: &self.spec.name,
            firing_id,
            params: &self.spec.params,
            store: &env.store,
        };

        if !self.spec.action.evaluate(&ctx).await? {
            return Ok(FiringOutcome::Skipped(SkipReason::PredicateFalse));
        }

        let permit = env.gate.acquire(&self.spec.identity).await;
        if let GateDecision::QueueFull {
            outstanding,
            ceiling,
        } = env.gate.check(&permit).await?
        {
            return Ok(FiringOutcome::QueueFull {
                identity: self.spec.identity.clone(),
                outstanding,
                ceiling,
            });
        }

        let handle = self.spec.action.submit(&ctx).await?;
        drop(permit);

        self.tracker.record_submission(handle.clone(), env.clock.now());
        Ok(FiringOutcome::Submitted { handle })
    }

    /// The tracker guard. `Some` means the firing is over.
    async fn settle_pending(
        &mut self,
        env: &FiringEnv,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<FiringOutcome>, StewardError> {
        let Some(pending) = self.tracker.pending() else {
            return Ok(None);
        };
        let handle = pending.handle.clone();

        let status = if self.tracker.needs_probe() {
            match env.prober.probe(&handle).await {
                Ok(status) => Some(status),
                Err(err) if self.tracker.is_overdue(now) => {
                    warn!(task = %self.spec.name, handle = %handle, error = %err, "probe failed past timeout");
                    None
                }
                Err(err) => return Err(err),
            }
        } else {
            None
        };

        let Some(decision) = self.tracker.decide(status, now) else {
            return Ok(None);
        };
        debug!(task = %self.spec.name, handle = %handle, ?status, ?decision, "probed");

        if decision == Decision::Confirm {
            self.publish_watermarks(env).await?;
        }
        Ok(self.tracker.apply(decision, now))
    }

    async fn publish_watermarks(&self, env: &FiringEnv) -> Result<(), StewardError> {
        let keys: Vec<&str> = self.spec.written_keys().collect();
        if keys.is_empty() {
            return Ok(());
        }

        let height = env.chain.block_height().await?;
        for key in keys {
            debug!(task = %self.spec.name, key, height, "watermark");
            env.store.set_watermark(key, height);
        }
        Ok(())
    }
}

/// Name the watchdog is scheduled under.
pub const WATCHDOG_TASK: &str = "watchdog";

#[derive(Debug, Clone, Default)]
pub struct Watchdog {
    last_height: Option<u64>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_height(&self) -> Option<u64> {
        self.last_height
    }

    /// Fails with [`StewardError::Stalled`] when the height did not move
    /// since the previous firing.
    pub async fn fire(&mut self, env: &FiringEnv) -> Result<FiringOutcome, StewardError> {
        let height = env.chain.block_height().await?;

        match self.last_height {
            Some(previous) if height <= previous => Err(StewardError::Stalled {
                previous,
                current: height,
            }),
            previous => {
                self.last_height = Some(height);
                Ok(FiringOutcome::ChainAdvanced { previous, height })
            }
        }
    }
}

/// Anything the supervisor schedules.
pub enum ScheduledTask {
    Operation(OperationTask),
    Watchdog(Watchdog),
}

impl ScheduledTask {
    pub async fn fire(
        &mut self,
        env: &FiringEnv,
        firing_id: FiringId,
    ) -> Result<FiringOutcome, StewardError> {
        match self {
            ScheduledTask::Operation(task) => task.fire(env, firing_id).await,
            ScheduledTask::Watchdog(watchdog) => watchdog.fire(env).await,
        }
    }

    pub fn pending(&self) -> Option<&PendingOperation> {
        match self {
            ScheduledTask::Operation(task) => task.pending(),
            ScheduledTask::Watchdog(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OperationStatus, Phase};
    use crate::impls::{ScriptedAction, SimulatedChain};
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    struct Fixture {
        chain: SimulatedChain,
        clock: FixedClock,
        env: FiringEnv,
    }

    fn fixture(ceiling: u64) -> Fixture {
        let chain = SimulatedChain::new(100);
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let env = FiringEnv {
            prober: Arc::new(chain.clone()),
            chain: Arc::new(chain.clone()),
            gate: Arc::new(SubmissionGate::new(Arc::new(chain.clone()), ceiling)),
            store: CoordinationStore::new(),
            clock: Arc::new(clock.clone()),
        };
        Fixture { chain, clock, env }
    }

    fn firing() -> FiringId {
        FiringId::from_ulid(Ulid::new())
    }

    fn operation_task(name: &str, action: &ScriptedAction) -> OperationTask {
        let spec = TaskSpec::new(name, Duration::from_secs(60), Arc::new(action.clone()))
            .timeout(Duration::from_secs(180));
        OperationTask::new(spec, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn single_flight_never_resubmits_while_pending() {
        let f = fixture(3);
        let action = ScriptedAction::new(f.chain.clone(), Identity::default());
        let mut task = operation_task("run_settlement", &action);

        let first = task.fire(&f.env, firing()).await.unwrap();
        assert_eq!(first.label(), "submitted");

        for _ in 0..2 {
            f.clock.advance(Duration::from_secs(60));
            let outcome = task.fire(&f.env, firing()).await.unwrap();
            assert_eq!(outcome.label(), "pending");
        }

        assert_eq!(action.submissions(), 1);
        // the predicate is not even consulted while an operation is in flight
        assert_eq!(action.evaluations(), 1);
    }

    #[tokio::test]
    async fn timeout_abandons_then_submits_a_new_operation() {
        let f = fixture(3);
        let action = ScriptedAction::new(f.chain.clone(), Identity::default());
        let mut task = operation_task("run_settlement", &action);

        let h1 = match task.fire(&f.env, firing()).await.unwrap() {
            FiringOutcome::Submitted { handle } => handle,
            other => panic!("unexpected {other:?}"),
        };

        f.clock.advance(Duration::from_secs(60));
        assert_eq!(task.fire(&f.env, firing()).await.unwrap().label(), "pending");
        f.clock.advance(Duration::from_secs(60));
        assert_eq!(task.fire(&f.env, firing()).await.unwrap().label(), "pending");

        f.clock.advance(Duration::from_secs(120));
        let outcome = task.fire(&f.env, firing()).await.unwrap();
        assert_eq!(
            outcome,
            FiringOutcome::TimedOut {
                handle: h1.clone(),
                elapsed_secs: 240
            }
        );
        assert_eq!(Phase::of(task.pending()), Phase::Idle);

        f.clock.advance(Duration::from_secs(60));
        let h2 = match task.fire(&f.env, firing()).await.unwrap() {
            FiringOutcome::Submitted { handle } => handle,
            other => panic!("unexpected {other:?}"),
        };
        assert_ne!(h1, h2);
    }

    #[tokio::test]
    async fn terminal_status_clears_the_slot() {
        let f = fixture(3);
        let action = ScriptedAction::new(f.chain.clone(), Identity::default());
        let mut task = operation_task("run_settlement", &action);

        task.fire(&f.env, firing()).await.unwrap();
        let handle = task.pending().unwrap().handle.clone();
        f.chain.settle(&handle, OperationStatus::Confirmed);

        assert_eq!(
            task.fire(&f.env, firing()).await.unwrap(),
            FiringOutcome::Confirmed { handle }
        );
        assert!(task.pending().is_none());
    }

    #[tokio::test]
    async fn dropped_operation_clears_immediately() {
        let f = fixture(3);
        let action = ScriptedAction::new(f.chain.clone(), Identity::default());
        let mut task = operation_task("run_settlement", &action);

        task.fire(&f.env, firing()).await.unwrap();
        let handle = task.pending().unwrap().handle.clone();
        f.chain.settle(&handle, OperationStatus::NotFound);

        let outcome = task.fire(&f.env, firing()).await.unwrap();
        assert_eq!(outcome, FiringOutcome::Dropped { handle });
        assert_eq!(outcome.health(), crate::domain::Heartbeat::Degraded);
        assert!(task.pending().is_none());
    }

    #[tokio::test]
    async fn reverted_is_held_for_grace_without_reprobing() {
        let f = fixture(3);
        let action = ScriptedAction::new(f.chain.clone(), Identity::default());
        let mut task = operation_task("run_settlement", &action);

        task.fire(&f.env, firing()).await.unwrap();
        let handle = task.pending().unwrap().handle.clone();
        f.chain.settle(&handle, OperationStatus::Reverted);

        f.clock.advance(Duration::from_secs(60));
        let outcome = task.fire(&f.env, firing()).await.unwrap();
        assert_eq!(
            outcome,
            FiringOutcome::Reverted {
                handle: handle.clone(),
                cleared: false
            }
        );
        let probes = f.chain.probe_count();

        f.clock.advance(Duration::from_secs(600));
        assert_eq!(task.fire(&f.env, firing()).await.unwrap().label(), "reverted");
        assert_eq!(f.chain.probe_count(), probes);
        assert_eq!(action.submissions(), 1);

        f.clock.advance(Duration::from_secs(3600));
        let outcome = task.fire(&f.env, firing()).await.unwrap();
        assert_eq!(outcome, FiringOutcome::Reverted { handle, cleared: true });
        assert!(task.pending().is_none());
    }

    #[tokio::test]
    async fn revert_seen_after_timeout_still_gets_grace() {
        // interval 600s > timeout 180s: the first probe is always overdue
        let f = fixture(3);
        let action = ScriptedAction::new(f.chain.clone(), Identity::default());
        let mut task = operation_task("run_settlement", &action);

        task.fire(&f.env, firing()).await.unwrap();
        let handle = task.pending().unwrap().handle.clone();
        f.chain.settle(&handle, OperationStatus::Reverted);

        f.clock.advance(Duration::from_secs(600));
        assert_eq!(
            task.fire(&f.env, firing()).await.unwrap(),
            FiringOutcome::Reverted {
                handle: handle.clone(),
                cleared: false
            }
        );
        assert_eq!(Phase::of(task.pending()), Phase::Reverted);

        f.clock.advance(Duration::from_secs(600));
        assert_eq!(task.fire(&f.env, firing()).await.unwrap().label(), "reverted");
        assert_eq!(action.submissions(), 1);
        assert_eq!(f.chain.operation_count(), 1);

        // grace measured from submitted_at: 3600s
        f.clock.advance(Duration::from_secs(2401));
        assert_eq!(
            task.fire(&f.env, firing()).await.unwrap(),
            FiringOutcome::Reverted { handle, cleared: true }
        );
        assert!(task.pending().is_none());

        assert_eq!(task.fire(&f.env, firing()).await.unwrap().label(), "submitted");
        assert_eq!(f.chain.operation_count(), 2);
    }

    #[tokio::test]
    async fn queue_full_blocks_submit() {
        let f = fixture(1);
        let action = ScriptedAction::new(f.chain.clone(), Identity::default());
        let mut task = operation_task("run_settlement", &action);
        f.chain.set_counts(&Identity::default(), 5, 4);

        let outcome = task.fire(&f.env, firing()).await.unwrap();
        assert_eq!(
            outcome,
            FiringOutcome::QueueFull {
                identity: Identity::default(),
                outstanding: 1,
                ceiling: 1
            }
        );
        assert_eq!(outcome.health(), crate::domain::Heartbeat::Degraded);
        assert_eq!(action.submissions(), 0);
        assert!(task.pending().is_none());
    }

    #[tokio::test]
    async fn gate_is_shared_by_tasks_of_one_identity() {
        let f = fixture(1);
        let a = ScriptedAction::new(f.chain.clone(), Identity::default());
        let b = ScriptedAction::new(f.chain.clone(), Identity::default());
        let mut task_a = operation_task("a", &a);
        let mut task_b = operation_task("b", &b);

        assert_eq!(task_a.fire(&f.env, firing()).await.unwrap().label(), "submitted");
        assert_eq!(task_b.fire(&f.env, firing()).await.unwrap().label(), "queue_full");
        assert_eq!(b.submissions(), 0);
    }

    #[tokio::test]
    async fn predicate_false_is_a_healthy_skip() {
        let f = fixture(1);
        let action = ScriptedAction::new(f.chain.clone(), Identity::default());
        action.set_ready(false);
        let mut task = operation_task("run_settlement", &action);

        let outcome = task.fire(&f.env, firing()).await.unwrap();
        assert_eq!(outcome, FiringOutcome::Skipped(SkipReason::PredicateFalse));
        assert_eq!(action.submissions(), 0);
    }

    #[tokio::test]
    async fn probe_error_before_timeout_is_recoverable() {
        let f = fixture(1);
        let action = ScriptedAction::new(f.chain.clone(), Identity::default());
        let mut task = operation_task("run_settlement", &action);
        task.fire(&f.env, firing()).await.unwrap();

        f.chain.fail_probes(true);
        f.clock.advance(Duration::from_secs(60));
        let err = task.fire(&f.env, firing()).await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(task.pending().is_some());

        f.clock.advance(Duration::from_secs(180));
        let outcome = task.fire(&f.env, firing()).await.unwrap();
        assert_eq!(outcome.label(), "timed_out");
        assert!(task.pending().is_none());
    }

    #[tokio::test]
    async fn submit_error_leaves_task_idle() {
        let f = fixture(1);
        let action = ScriptedAction::new(f.chain.clone(), Identity::default());
        action.fail_submit(true);
        let mut task = operation_task("run_settlement", &action);

        assert!(task.fire(&f.env, firing()).await.is_err());
        assert!(task.pending().is_none());
    }

    #[tokio::test]
    async fn downstream_waits_for_upstream_watermark() {
        let f = fixture(3);
        let up_action = ScriptedAction::new(f.chain.clone(), Identity::default());
        let down_action = ScriptedAction::new(f.chain.clone(), Identity::default());

        let mut upstream = OperationTask::new(
            TaskSpec::new("pay_holders", Duration::from_secs(60), Arc::new(up_action.clone()))
                .publishes("pay_holders_confirm_block"),
            Duration::from_secs(3600),
        );
        let mut downstream = OperationTask::new(
            TaskSpec::new("splitter", Duration::from_secs(60), Arc::new(down_action.clone()))
                .after(WatermarkGate::new("pay_holders_confirm_block", "splitter_confirm_block")),
            Duration::from_secs(3600),
        );

        // upstream key absent
        let outcome = downstream.fire(&f.env, firing()).await.unwrap();
        assert!(matches!(
            outcome,
            FiringOutcome::Skipped(SkipReason::AwaitingUpstream { upstream: None, .. })
        ));
        assert_eq!(down_action.evaluations(), 0);

        // upstream submits and confirms at height 105
        upstream.fire(&f.env, firing()).await.unwrap();
        let h = upstream.pending().unwrap().handle.clone();
        f.chain.set_height(105);
        f.chain.settle(&h, OperationStatus::Confirmed);
        upstream.fire(&f.env, firing()).await.unwrap();
        assert_eq!(f.env.store.watermark("pay_holders_confirm_block"), Some(105));

        // downstream may now act once
        assert_eq!(downstream.fire(&f.env, firing()).await.unwrap().label(), "submitted");
        let h = downstream.pending().unwrap().handle.clone();
        f.chain.set_height(110);
        f.chain.settle(&h, OperationStatus::Confirmed);
        downstream.fire(&f.env, firing()).await.unwrap();
        assert_eq!(f.env.store.watermark("splitter_confirm_block"), Some(110));

        // window closed until upstream fires again
        let outcome = downstream.fire(&f.env, firing()).await.unwrap();
        assert_eq!(outcome.label(), "awaiting_upstream");
        assert_eq!(down_action.submissions(), 1);
    }

    #[tokio::test]
    async fn confirmation_is_retried_when_height_is_unavailable() {
        let f = fixture(3);
        let action = ScriptedAction::new(f.chain.clone(), Identity::default());
        let mut task = OperationTask::new(
            TaskSpec::new("pay_holders", Duration::from_secs(60), Arc::new(action.clone()))
                .publishes("pay_holders_confirm_block"),
            Duration::from_secs(3600),
        );

        task.fire(&f.env, firing()).await.unwrap();
        let h = task.pending().unwrap().handle.clone();
        f.chain.settle(&h, OperationStatus::Confirmed);

        f.chain.fail_height(true);
        assert!(task.fire(&f.env, firing()).await.is_err());
        assert!(task.pending().is_some());

        f.chain.fail_height(false);
        assert_eq!(task.fire(&f.env, firing()).await.unwrap().label(), "confirmed");
        assert_eq!(f.env.store.watermark("pay_holders_confirm_block"), Some(100));
    }

    #[tokio::test]
    async fn params_reach_the_action() {
        let f = fixture(1);
        let action = ScriptedAction::new(f.chain.clone(), Identity::default());
        let spec = TaskSpec::new("run_settlement", Duration::from_secs(60), Arc::new(action.clone()))
            .params(TaskParams {
                partial_execution_steps: Some(100),
                gas_limit: None,
            });
        let mut task = OperationTask::new(spec, Duration::from_secs(3600));

        task.fire(&f.env, firing()).await.unwrap();
        assert_eq!(action.last_steps(), Some(100));
    }

    #[tokio::test]
    async fn watchdog_detects_stall() {
        let f = fixture(1);
        let mut watchdog = Watchdog::new();

        assert_eq!(
            watchdog.fire(&f.env).await.unwrap(),
            FiringOutcome::ChainAdvanced {
                previous: None,
                height: 100
            }
        );
        f.chain.advance(3);
        assert_eq!(
            watchdog.fire(&f.env).await.unwrap(),
            FiringOutcome::ChainAdvanced {
                previous: Some(100),
                height: 103
            }
        );

        let err = watchdog.fire(&f.env).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            StewardError::Stalled {
                previous: 103,
                current: 103
            }
        ));
    }

    #[tokio::test]
    async fn watchdog_height_error_is_recoverable() {
        let f = fixture(1);
        let mut watchdog = Watchdog::new();
        f.chain.fail_height(true);

        let err = watchdog.fire(&f.env).await.unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(watchdog.last_height(), None);
    }

    #[test]
    fn written_keys_cover_publish_and_own_watermark() {
        let chain = SimulatedChain::new(1);
        let action = Arc::new(ScriptedAction::new(chain, Identity::default()));
        let spec = TaskSpec::new("t", Duration::from_secs(1), action)
            .publishes("a")
            .after(WatermarkGate::new("up", "b"));
        let keys: Vec<&str> = spec.written_keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
