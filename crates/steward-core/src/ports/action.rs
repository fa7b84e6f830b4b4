//! TaskAction port - the domain predicate and action of one task.
//!
//! Implementations are contract calls (e.g. `isSettlementEnabled()` +
//! `runSettlement(steps)`). The core only decides *when* they run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app::coordination::CoordinationStore;
use crate::domain::{FiringId, OperationHandle, StewardError, TaskName};

/// Domain parameters passed through opaquely from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskParams {
    /// Batch size for operations that are executed in several steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_execution_steps: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
}

/// What an action can see during one firing.
#[derive(Debug, Clone, Copy)]
pub struct FiringContext<'a> {
    pub task: &'a TaskName,
    pub firing_id: FiringId,
    pub params: &'a TaskParams,
    /// Read access to shared watermarks. Writes go through the tracker.
    pub store: &'a CoordinationStore,
}

/// Condition + action pair of a task.
///
/// # Contract
/// - `evaluate` must not change state; it may be called on every idle firing.
/// - `submit` is only called after `evaluate` returned `true` and the
///   submission gate was clear, while the identity lock is held.
#[async_trait]
pub trait TaskAction: Send + Sync {
    /// Should this task act now?
    async fn evaluate(&self, ctx: &FiringContext<'_>) -> Result<bool, StewardError>;

    /// Perform the domain action and return the handle of the operation.
    async fn submit(&self, ctx: &FiringContext<'_>) -> Result<OperationHandle, StewardError>;
}
