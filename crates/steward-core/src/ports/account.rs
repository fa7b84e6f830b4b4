//! AccountState port - per-identity operation counters.

use async_trait::async_trait;

use crate::domain::{Identity, StewardError};

/// Counters of the submitting account (nonces on chain).
///
/// `outstanding_count - settled_count` is the number of operations the
/// identity has in flight.
#[async_trait]
pub trait AccountState: Send + Sync {
    /// Count including pending operations.
    async fn outstanding_count(&self, identity: &Identity) -> Result<u64, StewardError>;

    /// Count of operations already included in a block.
    async fn settled_count(&self, identity: &Identity) -> Result<u64, StewardError>;
}
