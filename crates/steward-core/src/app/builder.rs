//! SchedulerBuilder - registration, wiring and fail-fast validation.
//!
//! ```ignore
//! let scheduler = SchedulerBuilder::new()
//!     .collaborators(chain)
//!     .ceiling(1)
//!     .watchdog(Duration::from_secs(180))
//!     .register(TaskSpec::new("run_settlement", Duration::from_secs(60), action))
//!     .build()?;
//! let handle = scheduler.start();
//! ```
//!
//! `build()` checks everything that can be checked before the first tick:
//! unique task names, one writer per coordination key, non-zero durations
//! and ceilings, and that every collaborator the tasks need is present.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::coordination::CoordinationStore;
use crate::app::gate::{DEFAULT_CEILING, SubmissionGate};
use crate::app::snapshot::SnapshotFile;
use crate::app::status::StatusBoard;
use crate::app::supervisor::{Entry, Scheduler};
use crate::app::task::{FiringEnv, OperationTask, ScheduledTask, TaskSpec, WATCHDOG_TASK, Watchdog};
use crate::domain::{DEFAULT_REVERTED_GRACE, Identity, PendingOperation, StewardError, TaskName};
use crate::impls::NoopHealthSink;
use crate::ports::{
    AccountState, ChainHeight, Clock, HealthSink, OperationProber, SystemClock, UlidGenerator,
};

/// Why a scheduler could not be built.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no tasks registered")]
    NoTasks,

    #[error("task {0} registered more than once")]
    DuplicateTask(TaskName),

    #[error("coordination key {key:?} is written by both {first} and {second}")]
    DuplicateWriter {
        key: String,
        first: TaskName,
        second: TaskName,
    },

    #[error("task {0} has a zero interval")]
    ZeroInterval(TaskName),

    #[error("task {0} has a zero timeout")]
    ZeroTimeout(TaskName),

    #[error("ceiling must be at least 1 (identity: {0:?})")]
    ZeroCeiling(Option<Identity>),

    #[error("max_workers must be at least 1")]
    ZeroWorkers,

    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("restoring snapshot: {0}")]
    Restore(#[source] StewardError),
}

pub struct SchedulerBuilder {
    tasks: Vec<TaskSpec>,
    watchdog: Option<Duration>,
    prober: Option<Arc<dyn OperationProber>>,
    account: Option<Arc<dyn AccountState>>,
    chain: Option<Arc<dyn ChainHeight>>,
    health: Arc<dyn HealthSink>,
    clock: Arc<dyn Clock>,
    ceiling: u64,
    identity_ceilings: HashMap<Identity, u64>,
    reverted_grace: Duration,
    max_workers: Option<usize>,
    persist_path: Option<PathBuf>,
    store: CoordinationStore,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            watchdog: None,
            prober: None,
            account: None,
            chain: None,
            health: Arc::new(NoopHealthSink),
            clock: Arc::new(SystemClock),
            ceiling: DEFAULT_CEILING,
            identity_ceilings: HashMap::new(),
            reverted_grace: DEFAULT_REVERTED_GRACE,
            max_workers: None,
            persist_path: None,
            store: CoordinationStore::new(),
        }
    }

    /// Register an operation task.
    pub fn register(mut self, spec: TaskSpec) -> Self {
        self.tasks.push(spec);
        self
    }

    /// Schedule the chain watchdog every `interval`.
    pub fn watchdog(mut self, interval: Duration) -> Self {
        self.watchdog = Some(interval);
        self
    }

    pub fn prober(mut self, prober: Arc<dyn OperationProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn account_state(mut self, account: Arc<dyn AccountState>) -> Self {
        self.account = Some(account);
        self
    }

    pub fn chain(mut self, chain: Arc<dyn ChainHeight>) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Use one client for probing, account counters and chain height.
    pub fn collaborators<C>(self, client: C) -> Self
    where
        C: OperationProber + AccountState + ChainHeight + 'static,
    {
        let client = Arc::new(client);
        self.prober(client.clone())
            .account_state(client.clone())
            .chain(client)
    }

    pub fn health_sink(mut self, health: Arc<dyn HealthSink>) -> Self {
        self.health = health;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Default outstanding-operation ceiling for every identity.
    pub fn ceiling(mut self, ceiling: u64) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn identity_ceiling(mut self, identity: Identity, ceiling: u64) -> Self {
        self.identity_ceilings.insert(identity, ceiling);
        self
    }

    pub fn reverted_grace(mut self, grace: Duration) -> Self {
        self.reverted_grace = grace;
        self
    }

    /// Bound concurrent firings. Defaults to the number of distinct identities.
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    /// Persist tracker slots and watermarks to `path`, restoring them at build.
    pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }

    /// Share an existing store (e.g. to seed watermarks).
    pub fn coordination_store(mut self, store: CoordinationStore) -> Self {
        self.store = store;
        self
    }

    pub fn build(self) -> Result<Scheduler, BuildError> {
        self.validate()?;

        let needs_chain = self.watchdog.is_some()
            || self.tasks.iter().any(|t| t.written_keys().next().is_some());
        let chain: Arc<dyn ChainHeight> = match (self.chain, needs_chain) {
            (Some(chain), _) => chain,
            (None, true) => return Err(BuildError::MissingCollaborator("chain height")),
            (None, false) => Arc::new(NoChain),
        };

        let (prober, account): (Arc<dyn OperationProber>, Arc<dyn AccountState>) =
            if self.tasks.is_empty() {
                let prober: Arc<dyn OperationProber> = match self.prober {
                    Some(prober) => prober,
                    None => Arc::new(NoChain),
                };
                let account: Arc<dyn AccountState> = match self.account {
                    Some(account) => account,
                    None => Arc::new(NoChain),
                };
                (prober, account)
            } else {
                (
                    self.prober
                        .ok_or(BuildError::MissingCollaborator("operation prober"))?,
                    self.account
                        .ok_or(BuildError::MissingCollaborator("account state"))?,
                )
            };

        let mut gate = SubmissionGate::new(account, self.ceiling);
        for (identity, ceiling) in self.identity_ceilings {
            gate = gate.with_ceiling(identity, ceiling);
        }

        let identities: BTreeSet<&Identity> = self.tasks.iter().map(|t| &t.identity).collect();
        let workers = self.max_workers.unwrap_or(identities.len().max(1));

        let snapshot_file = self.persist_path.map(SnapshotFile::new);
        let mut restored = match &snapshot_file {
            Some(file) => file.load().map_err(BuildError::Restore)?,
            None => None,
        };
        if let Some(snapshot) = &mut restored {
            self.store.restore(std::mem::take(&mut snapshot.coordination));
        }

        let board = Arc::new(StatusBoard::new());
        let mut entries = Vec::with_capacity(self.tasks.len() + 1);

        for spec in self.tasks {
            let pending: Option<PendingOperation> = restored
                .as_mut()
                .and_then(|s| s.tasks.remove(&spec.name))
                .map(PendingOperation::from);
            if let Some(op) = &pending {
                info!(task = %spec.name, handle = %op.handle, "restored in-flight operation");
            }

            board.register(spec.name.clone(), pending.clone());
            let name = spec.name.clone();
            let interval = spec.interval;
            let mut task = OperationTask::new(spec, self.reverted_grace);
            task.restore(pending);

            entries.push(Entry {
                name,
                interval,
                pooled: true,
                task: ScheduledTask::Operation(task),
            });
        }

        if let Some(snapshot) = &restored {
            for name in snapshot.tasks.keys() {
                warn!(task = %name, "snapshot entry for unknown task ignored");
            }
        }

        if let Some(interval) = self.watchdog {
            let name = TaskName::new(WATCHDOG_TASK);
            board.register(name.clone(), None);
            entries.push(Entry {
                name,
                interval,
                pooled: false,
                task: ScheduledTask::Watchdog(Watchdog::new()),
            });
        }

        Ok(Scheduler {
            entries,
            env: FiringEnv {
                prober,
                chain,
                gate: Arc::new(gate),
                store: self.store,
                clock: Arc::clone(&self.clock),
            },
            health: self.health,
            ids: Arc::new(UlidGenerator::new(self.clock)),
            workers,
            board,
            snapshot: snapshot_file,
        })
    }

    fn validate(&self) -> Result<(), BuildError> {
        if self.tasks.is_empty() && self.watchdog.is_none() {
            return Err(BuildError::NoTasks);
        }
        if self.ceiling == 0 {
            return Err(BuildError::ZeroCeiling(None));
        }
        if let Some((identity, _)) = self.identity_ceilings.iter().find(|(_, c)| **c == 0) {
            return Err(BuildError::ZeroCeiling(Some(identity.clone())));
        }
        if self.max_workers == Some(0) {
            return Err(BuildError::ZeroWorkers);
        }

        let watchdog_name = TaskName::new(WATCHDOG_TASK);
        if self.watchdog == Some(Duration::ZERO) {
            return Err(BuildError::ZeroInterval(watchdog_name));
        }

        let mut names = BTreeSet::new();
        if self.watchdog.is_some() {
            names.insert(watchdog_name);
        }
        let mut writers: HashMap<&str, &TaskName> = HashMap::new();

        for spec in &self.tasks {
            if !names.insert(spec.name.clone()) {
                return Err(BuildError::DuplicateTask(spec.name.clone()));
            }
            if spec.interval.is_zero() {
                return Err(BuildError::ZeroInterval(spec.name.clone()));
            }
            if spec.timeout.is_zero() {
                return Err(BuildError::ZeroTimeout(spec.name.clone()));
            }
            for key in spec.written_keys() {
                if let Some(first) = writers.insert(key, &spec.name) {
                    return Err(BuildError::DuplicateWriter {
                        key: key.to_string(),
                        first: first.clone(),
                        second: spec.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Stands in for collaborators no registered task calls.
struct NoChain;

#[async_trait::async_trait]
impl OperationProber for NoChain {
    async fn probe(
        &self,
        _handle: &crate::domain::OperationHandle,
    ) -> Result<crate::domain::OperationStatus, StewardError> {
        Err(StewardError::collaborator("prober", "not configured"))
    }
}

#[async_trait::async_trait]
impl AccountState for NoChain {
    async fn outstanding_count(&self, _identity: &Identity) -> Result<u64, StewardError> {
        Err(StewardError::collaborator("account_state", "not configured"))
    }

    async fn settled_count(&self, _identity: &Identity) -> Result<u64, StewardError> {
        Err(StewardError::collaborator("account_state", "not configured"))
    }
}

#[async_trait::async_trait]
impl ChainHeight for NoChain {
    async fn block_height(&self) -> Result<u64, StewardError> {
        Err(StewardError::collaborator("chain", "not configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::coordination::WatermarkGate;
    use crate::impls::{ScriptedAction, SimulatedChain};

    fn spec(name: &str, chain: &SimulatedChain) -> TaskSpec {
        let action = Arc::new(ScriptedAction::new(chain.clone(), Identity::default()));
        TaskSpec::new(name, Duration::from_secs(60), action)
    }

    #[test]
    fn build_success() {
        let chain = SimulatedChain::new(1);
        let scheduler = SchedulerBuilder::new()
            .collaborators(chain.clone())
            .watchdog(Duration::from_secs(180))
            .register(spec("run_settlement", &chain))
            .register(spec("pay_holders", &chain).identity(Identity::new("ops")))
            .build()
            .unwrap();

        assert_eq!(scheduler.task_names().len(), 3);
        // two distinct identities
        assert_eq!(scheduler.workers(), 2);
    }

    #[test]
    fn build_rejects_duplicate_names() {
        let chain = SimulatedChain::new(1);
        let err = SchedulerBuilder::new()
            .collaborators(chain.clone())
            .register(spec("run_settlement", &chain))
            .register(spec("run_settlement", &chain))
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateTask(name) if name.as_str() == "run_settlement"));
    }

    #[test]
    fn task_may_not_shadow_the_watchdog() {
        let chain = SimulatedChain::new(1);
        let err = SchedulerBuilder::new()
            .collaborators(chain.clone())
            .watchdog(Duration::from_secs(180))
            .register(spec(WATCHDOG_TASK, &chain))
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateTask(_)));
    }

    #[test]
    fn build_rejects_two_writers_of_one_key() {
        let chain = SimulatedChain::new(1);
        let err = SchedulerBuilder::new()
            .collaborators(chain.clone())
            .register(spec("pay_holders", &chain).publishes("confirm_block"))
            .register(
                spec("splitter", &chain).after(WatermarkGate::new("upstream", "confirm_block")),
            )
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::DuplicateWriter { key, .. } if key == "confirm_block"
        ));
    }

    #[test]
    fn build_rejects_zero_values() {
        let chain = SimulatedChain::new(1);

        let err = SchedulerBuilder::new()
            .collaborators(chain.clone())
            .register(spec("t", &chain).timeout(Duration::ZERO))
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::ZeroTimeout(_)));

        let err = SchedulerBuilder::new()
            .collaborators(chain.clone())
            .ceiling(0)
            .register(spec("t", &chain))
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::ZeroCeiling(None)));

        let err = SchedulerBuilder::new()
            .collaborators(chain.clone())
            .max_workers(0)
            .register(spec("t", &chain))
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::ZeroWorkers));
    }

    #[test]
    fn build_requires_collaborators() {
        let chain = SimulatedChain::new(1);
        let err = SchedulerBuilder::new()
            .register(spec("t", &chain))
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::MissingCollaborator(_)));

        let err = SchedulerBuilder::new()
            .watchdog(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::MissingCollaborator("chain height")));
    }

    #[test]
    fn empty_builder_is_rejected() {
        assert!(matches!(
            SchedulerBuilder::new().build(),
            Err(BuildError::NoTasks)
        ));
    }

    #[test]
    fn build_restores_snapshot() {
        use crate::app::snapshot::{PersistedOperation, Snapshot};
        use crate::domain::{OperationHandle, Phase};
        use std::collections::BTreeMap;

        let path = std::env::temp_dir().join(format!("steward-build-{}.json", ulid::Ulid::new()));
        let snapshot = Snapshot {
            tasks: BTreeMap::from([(
                TaskName::new("run_settlement"),
                PersistedOperation {
                    operation_handle: OperationHandle::new("0xabc"),
                    submitted_at: chrono::Utc::now(),
                    reverted: false,
                },
            )]),
            coordination: BTreeMap::from([("k".to_string(), serde_json::json!(7))]),
        };
        SnapshotFile::new(&path).save(&snapshot).unwrap();

        let chain = SimulatedChain::new(1);
        let store = CoordinationStore::new();
        let scheduler = SchedulerBuilder::new()
            .collaborators(chain.clone())
            .coordination_store(store.clone())
            .persist_to(&path)
            .register(spec("run_settlement", &chain))
            .build()
            .unwrap();

        let view = scheduler
            .board
            .view(&TaskName::new("run_settlement"))
            .unwrap();
        assert_eq!(view.phase, Phase::AwaitingConfirmation);
        assert_eq!(view.handle, Some(OperationHandle::new("0xabc")));
        assert_eq!(store.watermark("k"), Some(7));

        std::fs::remove_file(path).unwrap();
    }
}
