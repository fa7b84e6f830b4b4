//! OperationProber port - status of a previously submitted operation.

use async_trait::async_trait;

use crate::domain::{OperationHandle, OperationStatus, StewardError};

/// Reports where an operation stands.
///
/// A lookup that finds no transaction maps to `NotFound`; a transaction
/// without a receipt maps to `Unconfirmed`. Transport failures are errors.
#[async_trait]
pub trait OperationProber: Send + Sync {
    async fn probe(&self, handle: &OperationHandle) -> Result<OperationStatus, StewardError>;
}
