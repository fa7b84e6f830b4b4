//! Shared coordination store - watermarks that sequence dependent tasks.
//!
//! An explicit object handed to every task at registration, never a global.
//!
//! # Writer discipline
//! Each key has exactly one writer task. `SchedulerBuilder::build` rejects
//! two tasks publishing the same key, so the store itself can stay a plain
//! last-writer-wins map with no multi-key transactions.
//!
//! # Reading
//! A missing key is "dependency not yet satisfied". Callers that want a
//! default must say so explicitly (see [`WatermarkGate::check`]).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Process-wide key/value map. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct CoordinationStore {
    entries: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl CoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.into(), value);
    }

    /// Read `key` as a block-height watermark. Non-integer values read as absent.
    pub fn watermark(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.as_u64())
    }

    pub fn set_watermark(&self, key: impl Into<String>, height: u64) {
        self.set(key, serde_json::Value::from(height));
    }

    /// Sorted copy of every entry (for snapshots and status views).
    pub fn snapshot(&self) -> BTreeMap<String, serde_json::Value> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Replace the whole map, e.g. from a persisted snapshot.
    pub fn restore(&self, snapshot: BTreeMap<String, serde_json::Value>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        *entries = snapshot.into_iter().collect();
    }
}

/// Causal gate of a downstream task.
///
/// The task may act only when `upstream > 0` and `upstream > watermark`.
/// After its own operation confirms, the tracker moves `watermark_key` to the
/// current height, which closes the window until the upstream fires again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkGate {
    /// Key written by the upstream task.
    pub upstream_key: String,
    /// Key owned by this task.
    pub watermark_key: String,
}

/// Result of a watermark check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateCheck {
    Open { upstream: u64, watermark: u64 },
    Closed { upstream: Option<u64>, watermark: u64 },
}

impl WatermarkGate {
    pub fn new(upstream_key: impl Into<String>, watermark_key: impl Into<String>) -> Self {
        Self {
            upstream_key: upstream_key.into(),
            watermark_key: watermark_key.into(),
        }
    }

    /// Our own watermark defaults to 0 when never written; an absent upstream
    /// key always keeps the gate closed.
    pub fn check(&self, store: &CoordinationStore) -> GateCheck {
        let watermark = store.watermark(&self.watermark_key).unwrap_or(0);
        match store.watermark(&self.upstream_key) {
            Some(upstream) if upstream > 0 && upstream > watermark => {
                GateCheck::Open {
                    upstream,
                    watermark,
                }
            }
            upstream => GateCheck::Closed {
                upstream,
                watermark,
            },
        }
    }
}
