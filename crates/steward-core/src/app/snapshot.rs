//! Durable snapshot of tracker slots and coordination watermarks.
//!
//! Layout:
//! ```json
//! {
//!   "tasks": { "run_settlement": { "operation_handle": "0x..", "submitted_at": "..", "reverted": false } },
//!   "coordination": { "pay_holders_confirm_block": 1234 }
//! }
//! ```
//! Idle tasks are omitted. Writes go to `<path>.tmp` and are renamed over
//! the target, so a crash mid-write leaves the previous snapshot intact.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{OperationHandle, PendingOperation, StewardError, TaskName};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedOperation {
    pub operation_handle: OperationHandle,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub reverted: bool,
}

impl From<&PendingOperation> for PersistedOperation {
    fn from(op: &PendingOperation) -> Self {
        Self {
            operation_handle: op.handle.clone(),
            submitted_at: op.submitted_at,
            reverted: op.reverted,
        }
    }
}

impl From<PersistedOperation> for PendingOperation {
    fn from(op: PersistedOperation) -> Self {
        let mut pending = PendingOperation::new(op.operation_handle, op.submitted_at);
        if op.reverted {
            pending.mark_reverted();
        }
        pending
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub tasks: BTreeMap<TaskName, PersistedOperation>,
    #[serde(default)]
    pub coordination: BTreeMap<String, serde_json::Value>,
}

impl Snapshot {
    pub fn new(
        pending: &BTreeMap<TaskName, PendingOperation>,
        coordination: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            tasks: pending
                .iter()
                .map(|(task, op)| (task.clone(), PersistedOperation::from(op)))
                .collect(),
            coordination,
        }
    }
}

/// JSON snapshot at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no snapshot was written yet.
    pub fn load(&self) -> Result<Option<Snapshot>, StewardError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StewardError::Snapshot(format!(
                    "read {}: {e}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StewardError::Snapshot(format!("decode {}: {e}", self.path.display())))
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<(), StewardError> {
        let bytes = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| StewardError::Snapshot(format!("encode: {e}")))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, bytes)
            .map_err(|e| StewardError::Snapshot(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            StewardError::Snapshot(format!("rename to {}: {e}", self.path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("steward-{name}-{}.json", ulid::Ulid::new()))
    }

    #[test]
    fn missing_file_is_no_snapshot() {
        let file = SnapshotFile::new(temp_path("missing"));
        assert_eq!(file.load().unwrap(), None);
    }

    #[test]
    fn save_then_load_keeps_slots_and_watermarks() {
        let path = temp_path("roundtrip");
        let file = SnapshotFile::new(&path);

        let submitted_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut op = PendingOperation::new(OperationHandle::new("0xabc"), submitted_at);
        op.mark_reverted();
        let pending = BTreeMap::from([(TaskName::new("run_settlement"), op.clone())]);
        let coordination = BTreeMap::from([(
            "pay_holders_confirm_block".to_string(),
            serde_json::json!(1234),
        )]);

        file.save(&Snapshot::new(&pending, coordination)).unwrap();
        let loaded = file.load().unwrap().unwrap();

        let restored: PendingOperation = loaded.tasks[&TaskName::new("run_settlement")]
            .clone()
            .into();
        assert_eq!(restored, op);
        assert_eq!(loaded.coordination["pay_holders_confirm_block"], 1234);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn layout_uses_operation_handle_key() {
        let submitted_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let op = PendingOperation::new(OperationHandle::new("0xabc"), submitted_at);
        let pending = BTreeMap::from([(TaskName::new("t"), op)]);

        let v = serde_json::to_value(Snapshot::new(&pending, BTreeMap::new())).unwrap();
        assert_eq!(v["tasks"]["t"]["operation_handle"], "0xabc");
        assert_eq!(v["tasks"]["t"]["reverted"], false);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let path = temp_path("corrupt");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = SnapshotFile::new(&path).load().unwrap_err();
        assert!(matches!(err, StewardError::Snapshot(_)));

        std::fs::remove_file(path).unwrap();
    }
}
