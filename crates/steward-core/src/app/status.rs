//! Status - per-task view of the running scheduler.
//!
//! Task loops write a [`TaskRecord`] after every firing; readers get sorted
//! [`StatusView`]s without touching the tasks themselves, so a status query
//! never waits on a firing in progress.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FiringOutcome, OperationHandle, PendingOperation, Phase, StewardError, TaskName};

#[derive(Debug, Clone, Default)]
pub struct TaskRecord {
    pub pending: Option<PendingOperation>,
    pub last_outcome: Option<FiringOutcome>,
    pub last_error: Option<String>,
    pub firings: u64,
}

/// Snapshot of one task for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    pub task: TaskName,
    pub phase: Phase,
    pub handle: Option<OperationHandle>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<FiringOutcome>,
    pub last_error: Option<String>,
    pub firings: u64,
}

impl StatusView {
    fn new(task: &TaskName, record: &TaskRecord) -> Self {
        Self {
            task: task.clone(),
            phase: Phase::of(record.pending.as_ref()),
            handle: record.pending.as_ref().map(|op| op.handle.clone()),
            submitted_at: record.pending.as_ref().map(|op| op.submitted_at),
            last_outcome: record.last_outcome.clone(),
            last_error: record.last_error.clone(),
            firings: record.firings,
        }
    }
}

#[derive(Debug, Default)]
pub struct StatusBoard {
    records: RwLock<BTreeMap<TaskName, TaskRecord>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task before its first firing.
    pub fn register(&self, task: TaskName, pending: Option<PendingOperation>) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(
            task,
            TaskRecord {
                pending,
                ..TaskRecord::default()
            },
        );
    }

    /// Record the result of one firing.
    pub fn record(
        &self,
        task: &TaskName,
        pending: Option<PendingOperation>,
        result: &Result<FiringOutcome, StewardError>,
    ) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records.entry(task.clone()).or_default();
        record.pending = pending;
        record.firings += 1;
        match result {
            Ok(outcome) => {
                record.last_outcome = Some(outcome.clone());
                record.last_error = None;
            }
            Err(err) => record.last_error = Some(err.to_string()),
        }
    }

    pub fn views(&self) -> Vec<StatusView> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .map(|(task, record)| StatusView::new(task, record))
            .collect()
    }

    pub fn view(&self, task: &TaskName) -> Option<StatusView> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.get(task).map(|record| StatusView::new(task, record))
    }

    /// In-flight operations by task.
    pub fn pending(&self) -> BTreeMap<TaskName, PendingOperation> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .filter_map(|(task, record)| record.pending.clone().map(|op| (task.clone(), op)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_updates_phase_and_counters() {
        let board = StatusBoard::new();
        let task = TaskName::new("run_settlement");
        board.register(task.clone(), None);

        let view = board.view(&task).unwrap();
        assert_eq!(view.phase, Phase::Idle);
        assert_eq!(view.firings, 0);

        let op = PendingOperation::new(OperationHandle::new("0x1"), Utc::now());
        board.record(
            &task,
            Some(op.clone()),
            &Ok(FiringOutcome::Submitted {
                handle: op.handle.clone(),
            }),
        );
        let view = board.view(&task).unwrap();
        assert_eq!(view.phase, Phase::AwaitingConfirmation);
        assert_eq!(view.handle, Some(op.handle.clone()));
        assert_eq!(view.firings, 1);

        board.record(
            &task,
            Some(op),
            &Err(StewardError::collaborator("prober", "timeout")),
        );
        let view = board.view(&task).unwrap();
        assert_eq!(view.firings, 2);
        assert_eq!(view.last_error.as_deref(), Some("prober failed: timeout"));
        assert_eq!(view.last_outcome.map(|o| o.label()), Some("submitted"));
        assert_eq!(board.pending().len(), 1);
    }

    #[test]
    fn views_are_sorted_by_task_name() {
        let board = StatusBoard::new();
        board.register(TaskName::new("b"), None);
        board.register(TaskName::new("a"), None);

        let names: Vec<String> = board
            .views()
            .into_iter()
            .map(|v| v.task.to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
