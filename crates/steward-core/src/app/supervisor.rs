//! Supervisor - runs every task on its own interval.
//!
//! # Per-firing isolation
//! Each firing is spawned as its own tokio task and awaited. An error comes
//! back as `Err`, a panic as a `JoinError` that becomes
//! [`StewardError::Panicked`]. Either way the loop logs it, reports a
//! degraded heartbeat and goes on with the next tick.
//!
//! # Ordering
//! - a task's next tick is only considered after its current firing ended
//!   (no overlapping firings of one task);
//! - operation tasks take a worker permit, bounding parallelism across tasks;
//! - the watchdog runs outside the pool so busy workers cannot hide a stall.
//!
//! # Shutdown
//! `stop()` and fatal errors both go through one [`ShutdownSignal`]. Loops
//! stop taking ticks once it is set; a firing already running finishes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::app::shutdown::{ShutdownReason, ShutdownSignal};
use crate::app::snapshot::{Snapshot, SnapshotFile};
use crate::app::status::{StatusBoard, StatusView};
use crate::app::task::{FiringEnv, ScheduledTask};
use crate::domain::{FiringId, FiringOutcome, Heartbeat, StewardError, TaskName};
use crate::ports::{HealthSink, IdGenerator};

/// One task as handed to the supervisor.
pub(crate) struct Entry {
    pub name: TaskName,
    pub interval: Duration,
    /// Takes a worker permit for each firing.
    pub pooled: bool,
    pub task: ScheduledTask,
}

/// A built, not yet running scheduler.
pub struct Scheduler {
    pub(crate) entries: Vec<Entry>,
    pub(crate) env: FiringEnv,
    pub(crate) health: Arc<dyn HealthSink>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) workers: usize,
    pub(crate) board: Arc<StatusBoard>,
    pub(crate) snapshot: Option<SnapshotFile>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&TaskName> = self.entries.iter().map(|e| &e.name).collect();
        f.debug_struct("Scheduler")
            .field("tasks", &names)
            .field("workers", &self.workers)
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}

struct Shared {
    env: FiringEnv,
    health: Arc<dyn HealthSink>,
    ids: Arc<dyn IdGenerator>,
    workers: Arc<Semaphore>,
    board: Arc<StatusBoard>,
    snapshot: Option<SnapshotFile>,
    persist_lock: Mutex<()>,
    shutdown: ShutdownSignal,
}

impl Scheduler {
    pub fn task_names(&self) -> Vec<TaskName> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Spawn one loop per task. Must be called inside a tokio runtime.
    pub fn start(self) -> SchedulerHandle {
        let run_id = self.ids.generate_run_id();
        info!(
            run = %run_id,
            tasks = self.entries.len(),
            workers = self.workers,
            "scheduler starting"
        );

        // alarm stays raised until the first healthy firing
        self.health.report_heartbeat(Heartbeat::Degraded);

        let shutdown = ShutdownSignal::new();
        let shared = Arc::new(Shared {
            env: self.env,
            health: self.health,
            ids: self.ids,
            workers: Arc::new(Semaphore::new(self.workers)),
            board: Arc::clone(&self.board),
            snapshot: self.snapshot,
            persist_lock: Mutex::new(()),
            shutdown: shutdown.clone(),
        });

        let joins = self
            .entries
            .into_iter()
            .map(|entry| tokio::spawn(task_loop(entry, Arc::clone(&shared))))
            .collect();

        SchedulerHandle {
            shutdown,
            joins,
            board: self.board,
            shared,
        }
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    shutdown: ShutdownSignal,
    joins: Vec<JoinHandle<()>>,
    board: Arc<StatusBoard>,
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Ask every loop to stop after its current firing.
    pub fn stop(&self) {
        if self.shutdown.trigger(ShutdownReason::Requested) {
            info!("shutdown requested");
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn status(&self) -> Vec<StatusView> {
        self.board.views()
    }

    /// Resolves when a shutdown reason is set (stop or fatal error).
    pub async fn stopped(&self) -> ShutdownReason {
        self.shutdown.triggered().await
    }

    /// Wait for every loop to end, write a final snapshot and return why
    /// the scheduler stopped.
    pub async fn join(self) -> ShutdownReason {
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "task loop ended abnormally");
            }
        }
        self.shared.persist().await;

        let reason = self.shutdown.reason().unwrap_or(ShutdownReason::Requested);
        info!(?reason, "scheduler stopped");
        reason
    }

    /// `stop()` followed by `join()`.
    pub async fn shutdown(self) -> ShutdownReason {
        self.stop();
        self.join().await
    }
}

async fn task_loop(entry: Entry, shared: Arc<Shared>) {
    let Entry {
        name,
        interval,
        pooled,
        task,
    } = entry;
    let task = Arc::new(Mutex::new(task));

    let mut shutdown_rx = shared.shutdown.subscribe();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if shared.shutdown.is_triggered() {
            break;
        }

        tokio::select! {
            _ = shutdown_rx.changed() => continue,
            _ = ticker.tick() => {}
        }

        let permit = if pooled {
            tokio::select! {
                _ = shutdown_rx.changed() => continue,
                permit = Arc::clone(&shared.workers).acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
            }
        } else {
            None
        };

        if shared.shutdown.is_triggered() {
            break;
        }

        let firing_id = shared.ids.generate_firing_id();
        debug!(task = %name, firing = %firing_id, "firing");
        let result = run_isolated(&task, &shared.env, firing_id).await;
        drop(permit);

        let pending = task.lock().await.pending().cloned();
        let changed = matches!(&result, Ok(outcome) if outcome.changes_state());
        shared.board.record(&name, pending, &result);

        let heartbeat = shared.report(&name, firing_id, &result);
        shared.health.report_heartbeat(heartbeat);

        if changed {
            shared.persist().await;
        }

        if let Err(err) = &result {
            if err.is_fatal() {
                let reason = ShutdownReason::Fatal {
                    task: name.clone(),
                    error: err.to_string(),
                };
                if shared.shutdown.trigger(reason) {
                    error!(task = %name, error = %err, "fatal error, shutting down");
                }
                break;
            }
        }
    }

    debug!(task = %name, "task loop stopped");
}

/// Run one firing on its own tokio task so a panic stays inside it.
async fn run_isolated(
    task: &Arc<Mutex<ScheduledTask>>,
    env: &FiringEnv,
    firing_id: FiringId,
) -> Result<FiringOutcome, StewardError> {
    let task = Arc::clone(task);
    let env = env.clone();

    let join = tokio::spawn(async move {
        let mut task = task.lock().await;
        task.fire(&env, firing_id).await
    });

    match join.await {
        Ok(result) => result,
        Err(e) => Err(StewardError::Panicked(panic_message(e))),
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Shared {
    /// Log one firing and derive its heartbeat.
    fn report(
        &self,
        task: &TaskName,
        firing_id: FiringId,
        result: &Result<FiringOutcome, StewardError>,
    ) -> Heartbeat {
        match result {
            Ok(outcome) => {
                let heartbeat = outcome.health();
                match heartbeat {
                    Heartbeat::Healthy => info!(
                        task = %task,
                        firing = %firing_id,
                        outcome = outcome.label(),
                        detail = ?outcome,
                        "firing finished"
                    ),
                    Heartbeat::Degraded => warn!(
                        task = %task,
                        firing = %firing_id,
                        outcome = outcome.label(),
                        detail = ?outcome,
                        "firing degraded"
                    ),
                }
                heartbeat
            }
            Err(err) => {
                error!(
                    task = %task,
                    firing = %firing_id,
                    error = %err,
                    fatal = err.is_fatal(),
                    "firing failed"
                );
                Heartbeat::Degraded
            }
        }
    }

    /// Write the current slots and watermarks on the blocking pool.
    ///
    /// The lock is taken before the state is read, so writes land in the
    /// order the state changed.
    async fn persist(&self) {
        let Some(file) = &self.snapshot else {
            return;
        };

        let _guard = self.persist_lock.lock().await;
        let snapshot = Snapshot::new(&self.board.pending(), self.env.store.snapshot());
        let writer = file.clone();
        let result = tokio::task::spawn_blocking(move || writer.save(&snapshot))
            .await
            .unwrap_or_else(|e| Err(StewardError::Snapshot(format!("writer task: {e}"))));
        if let Err(e) = result {
            warn!(path = %file.path().display(), error = %e, "snapshot not written");
        }
    }
}
