//! SubmissionGate - 送信 identity ごとの未確定オペレーション上限
//!
//! # 保証
//! - **上限 (ceiling)**: `outstanding - settled >= ceiling` の間は submit しない
//! - **直列化**: 同じ identity を使うタスクは、チェックの前にその identity の
//!   ロックを取り、submit が終わるまで保持する。2 つのタスクが同じカウントを
//!   読んで両方とも送信することはない。
//!
//! ## ロックの使い分け
//! - identity → ロックの map は std `Mutex`（lookup の間だけ、await を跨がない）
//! - identity ごとのロックは `tokio::sync::Mutex`（チェックと submit の await を跨ぐ）
//!
//! 異なる identity 同士は競合しない。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use crate::domain::{Identity, StewardError};
use crate::ports::AccountState;

/// Default ceiling when neither the task nor the config sets one.
pub const DEFAULT_CEILING: u64 = 1;

/// Result of a ceiling check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Clear { outstanding: u64 },
    QueueFull { outstanding: u64, ceiling: u64 },
}

/// Exclusive right to check and submit for one identity.
///
/// Dropping the permit releases the identity.
pub struct GatePermit {
    identity: Identity,
    _guard: OwnedMutexGuard<()>,
}

impl GatePermit {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

pub struct SubmissionGate {
    account: Arc<dyn AccountState>,
    default_ceiling: u64,
    ceilings: HashMap<Identity, u64>,
    locks: Mutex<HashMap<Identity, Arc<tokio::sync::Mutex<()>>>>,
}

impl SubmissionGate {
    pub fn new(account: Arc<dyn AccountState>, default_ceiling: u64) -> Self {
        Self {
            account,
            default_ceiling,
            ceilings: HashMap::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Override the ceiling of one identity.
    pub fn with_ceiling(mut self, identity: Identity, ceiling: u64) -> Self {
        self.ceilings.insert(identity, ceiling);
        self
    }

    pub fn ceiling(&self, identity: &Identity) -> u64 {
        self.ceilings
            .get(identity)
            .copied()
            .unwrap_or(self.default_ceiling)
    }

    /// Wait for exclusive use of `identity`.
    pub async fn acquire(&self, identity: &Identity) -> GatePermit {
        let lock = {
            // std Mutex: held only for the map lookup, never across an await
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(identity.clone()).or_default())
        };

        GatePermit {
            identity: identity.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Compare the identity's in-flight count with its ceiling.
    pub async fn check(&self, permit: &GatePermit) -> Result<GateDecision, StewardError> {
        let identity = permit.identity();
        let current = self.account.outstanding_count(identity).await?;
        let settled = self.account.settled_count(identity).await?;

        let outstanding = current.saturating_sub(settled);
        let ceiling = self.ceiling(identity);

        if outstanding >= ceiling {
            Ok(GateDecision::QueueFull {
                outstanding,
                ceiling,
            })
        } else {
            Ok(GateDecision::Clear { outstanding })
        }
    }
}
